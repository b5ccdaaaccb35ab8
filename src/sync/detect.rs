/// Change detection at entity granularity.
///
/// Compares the local card and the fresh remote snapshot against the last
/// known state from the sync record, per individual checkitem and per
/// individual comment, never whole-card. Edits to different entities are
/// independent and never conflict with each other.
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::SyncError;
use crate::storage::state::SyncStateRecord;
use crate::types::{Card, Comment, EntityKey, ItemState, RemoteComment, RemoteSnapshot};

/// Which side changed an entity since the last reconciled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    LocalOnly,
    RemoteOnly,
    BothEqual,
    BothConflicting,
}

/// A changed checkitem. `local`/`remote` are `None` when the item is absent
/// on that side (added or removed entity).
#[derive(Debug, Clone, PartialEq)]
pub struct ItemChange {
    pub checklist: String,
    pub item: String,
    pub local: Option<ItemState>,
    pub remote: Option<ItemState>,
    pub last_known: Option<ItemState>,
    pub disposition: Disposition,
}

impl ItemChange {
    pub fn key(&self) -> EntityKey {
        EntityKey::Item {
            checklist: self.checklist.clone(),
            item: self.item.clone(),
        }
    }
}

/// A changed comment, keyed by content fingerprint. Comments are
/// append-only, so a comment only ever appears as present-on-one-side or
/// newly present on both (convergence).
#[derive(Debug, Clone, PartialEq)]
pub struct CommentChange {
    pub fingerprint: String,
    pub local: Option<Comment>,
    pub remote: Option<RemoteComment>,
    pub disposition: Disposition,
}

impl CommentChange {
    pub fn key(&self) -> EntityKey {
        EntityKey::Comment {
            fingerprint: self.fingerprint.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub items: Vec<ItemChange>,
    pub comments: Vec<CommentChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.comments.is_empty()
    }
}

/// Duplicate name keys on the remote side are just as ambiguous as local
/// ones; validate the snapshot before matching anything against it.
pub fn validate_snapshot(snapshot: &RemoteSnapshot) -> Result<(), SyncError> {
    let mut names: HashSet<&str> = HashSet::new();
    for list in &snapshot.checklists {
        if !names.insert(&list.name) {
            return Err(SyncError::validation(
                &snapshot.card_id,
                format!("remote has duplicate checklist name '{}'", list.name),
            ));
        }
        let mut items: HashSet<&str> = HashSet::new();
        for item in &list.items {
            if !items.insert(&item.name) {
                return Err(SyncError::validation(
                    &snapshot.card_id,
                    format!(
                        "remote has duplicate item '{}' in checklist '{}'",
                        item.name, list.name
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Partition per-entity deltas. The snapshot must already be validated.
pub fn detect(
    card: &Card,
    snapshot: &RemoteSnapshot,
    record: &SyncStateRecord,
) -> ChangeSet {
    ChangeSet {
        items: detect_items(card, snapshot, record),
        comments: detect_comments(card, snapshot, record),
    }
}

fn detect_items(card: &Card, snapshot: &RemoteSnapshot, record: &SyncStateRecord) -> Vec<ItemChange> {
    // Union of composite keys on both sides, in a stable order.
    let mut keys: Vec<(String, String)> = Vec::new();
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    for list in &card.checklists {
        for item in &list.items {
            let key = (list.name.clone(), item.text.clone());
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
    }
    for list in &snapshot.checklists {
        for item in &list.items {
            let key = (list.name.clone(), item.name.clone());
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
    }

    let mut changes = Vec::new();
    for (checklist, item) in keys {
        let local = card.find_item(&checklist, &item).map(|i| i.state);
        let remote = snapshot.find_item(&checklist, &item).map(|i| i.state);
        let last_known = record.last_known_item_state(&checklist, &item);

        let local_changed = local != last_known;
        let remote_changed = remote != last_known;
        if !local_changed && !remote_changed {
            continue;
        }

        let disposition = match (local_changed, remote_changed) {
            (true, false) => Disposition::LocalOnly,
            (false, true) => Disposition::RemoteOnly,
            (true, true) if local == remote => Disposition::BothEqual,
            (true, true) => Disposition::BothConflicting,
            (false, false) => unreachable!("filtered above"),
        };

        changes.push(ItemChange {
            checklist,
            item,
            local,
            remote,
            last_known,
            disposition,
        });
    }
    changes
}

fn detect_comments(
    card: &Card,
    snapshot: &RemoteSnapshot,
    record: &SyncStateRecord,
) -> Vec<CommentChange> {
    let mut remote_by_fp: BTreeMap<String, &RemoteComment> = BTreeMap::new();
    for comment in &snapshot.comments {
        remote_by_fp.entry(comment.fingerprint()).or_insert(comment);
    }

    let mut changes = Vec::new();
    let mut local_fps: BTreeSet<String> = BTreeSet::new();

    for comment in &card.comments {
        let fp = comment.fingerprint();
        if !local_fps.insert(fp.clone()) {
            // Same author+body twice locally; one copy covers both.
            continue;
        }
        match remote_by_fp.get(&fp) {
            Some(remote) if !record.knows_comment(&fp) => {
                // Present on both sides but not yet recorded: converge.
                changes.push(CommentChange {
                    fingerprint: fp,
                    local: Some(comment.clone()),
                    remote: Some((*remote).clone()),
                    disposition: Disposition::BothEqual,
                });
            }
            Some(_) => {} // already synced, no change
            None if record.knows_comment(&fp) => {
                // Previously synced but gone remotely. The local copy
                // stays, and the record keeps the fingerprint so the
                // deleted comment is never pushed back.
            }
            None => {
                changes.push(CommentChange {
                    fingerprint: fp,
                    local: Some(comment.clone()),
                    remote: None,
                    disposition: Disposition::LocalOnly,
                });
            }
        }
    }

    for (fp, remote) in &remote_by_fp {
        if local_fps.contains(fp) || record.knows_comment(fp) {
            continue;
        }
        changes.push(CommentChange {
            fingerprint: fp.clone(),
            local: None,
            remote: Some((*remote).clone()),
            disposition: Disposition::RemoteOnly,
        });
    }

    changes
}
