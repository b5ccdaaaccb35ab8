/// Identity resolution between human-readable names and remote ids.
///
/// Checklists and checkitems carry no stable local identifier, so the
/// engine keys them by name and keeps a name→id cache in the sync record.
/// The cache is a convenience only: every cycle starts from a fresh
/// snapshot and the snapshot's ids are authoritative, so a stale cache can
/// cause at most one extra refresh, never a wrong-target mutation.
use crate::parser::CardFile;
use crate::storage::state::SyncStateRecord;
use crate::types::{Card, RemoteSnapshot};

/// Rebuild the record's name→id caches from a fresh snapshot. Entries for
/// names no longer present remotely are dropped; renamed entities simply
/// reappear under their new name.
pub fn adopt_snapshot_ids(record: &mut SyncStateRecord, snapshot: &RemoteSnapshot) {
    record.checklist_ids.clear();
    record.checkitem_ids.clear();
    for list in &snapshot.checklists {
        record
            .checklist_ids
            .insert(list.name.clone(), list.id.clone());
        let items = record.checkitem_ids.entry(list.name.clone()).or_default();
        for item in &list.items {
            items.insert(item.name.clone(), item.id.clone());
        }
    }
    // Refresh ids for comments we already track. A pushed comment can come
    // back under a different author line (the token owner's display name),
    // so match by id as well as by fingerprint. Unseen fingerprints are
    // left alone so change detection still sees them as remote-only.
    let known_ids: std::collections::BTreeSet<String> =
        record.comment_ids.values().cloned().collect();
    for comment in &snapshot.comments {
        let fp = comment.fingerprint();
        if record.knows_comment(&fp) || known_ids.contains(&comment.id) {
            record.record_comment(&fp, &comment.id);
        }
    }
}

/// Build a fresh record from a card file's frontmatter. Used when the
/// record is missing (first sync of a hand-written mirror, or the state
/// directory was lost). Id caches are seeded from the frontmatter; the
/// last-known baseline stays empty so any divergence between the two
/// sides is surfaced as a conflict rather than silently overwritten.
pub fn bootstrap_record(file: &CardFile) -> SyncStateRecord {
    let card = &file.card;
    let mut record = SyncStateRecord::new(card.remote_id.clone());
    for list in &card.checklists {
        if let Some(id) = &list.remote_id {
            record.checklist_ids.insert(list.name.clone(), id.clone());
        }
        let items = record.checkitem_ids.entry(list.name.clone()).or_default();
        for item in &list.items {
            if let Some(id) = &item.remote_id {
                items.insert(item.text.clone(), id.clone());
            }
        }
        if items.is_empty() {
            record.checkitem_ids.remove(&list.name);
        }
    }
    for comment in &card.comments {
        if let Some(id) = &comment.remote_id {
            record.record_comment(&comment.fingerprint(), id);
        }
    }
    record.last_local_sync = card.last_synced;
    record.sync_status = card.sync_status;
    record
}

/// Stamp the record's remote ids onto the card's entities so the rendered
/// frontmatter reflects the latest known mapping.
pub fn apply_ids(card: &mut Card, record: &SyncStateRecord) {
    for list in &mut card.checklists {
        if let Some(id) = record.checklist_ids.get(&list.name) {
            list.remote_id = Some(id.clone());
        }
        for item in &mut list.items {
            if let Some(id) = record.checkitem_id(&list.name, &item.text) {
                item.remote_id = Some(id.to_string());
            }
        }
    }
    for comment in &mut card.comments {
        if let Some(id) = record.comment_ids.get(&comment.fingerprint()) {
            comment.remote_id = Some(id.clone());
        }
    }
}
