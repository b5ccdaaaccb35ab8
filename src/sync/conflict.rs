/// Per-entity conflict classification.
///
/// Maps the change detector's partition onto a per-entity state machine
/// (clean, local ahead, remote ahead, conflicting) and emits the planned
/// actions for one cycle. Comments are append-only and resolved by set
/// union, so only checkitems ever reach the conflicting state.
use serde::{Deserialize, Serialize};

use crate::storage::state::SyncStateRecord;
use crate::sync::detect::{ChangeSet, CommentChange, Disposition, ItemChange};
use crate::types::{Comment, EntityKey, ItemState, RemoteComment};

/// Resolution policy for entities changed on both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Keep the remote value, annotate the local file, flag the entity.
    #[default]
    RemoteWins,
    /// Push the local value as if the remote side had not changed.
    LocalWins,
    /// Touch neither side; flag the entity and wait for acknowledgement.
    Skip,
}

/// Terminal per-cycle state of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Clean,
    LocalAhead,
    RemoteAhead,
    Conflicting,
}

impl From<Disposition> for EntityState {
    fn from(d: Disposition) -> Self {
        match d {
            Disposition::LocalOnly => EntityState::LocalAhead,
            Disposition::RemoteOnly => EntityState::RemoteAhead,
            Disposition::BothEqual => EntityState::Clean,
            Disposition::BothConflicting => EntityState::Conflicting,
        }
    }
}

/// One remote mutation or local application the orchestrator should make.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    /// Push a checkitem state to the remote side.
    SetItemState {
        checklist: String,
        item: String,
        state: ItemState,
    },
    /// Push a new comment to the remote side.
    AddComment { comment: Comment },
    /// Apply a remote checkitem value locally. `None` removes the item.
    PullItem {
        checklist: String,
        item: String,
        state: Option<ItemState>,
    },
    /// Bring a remote comment into the local file (or just record it when
    /// the same content is already present locally).
    PullComment { comment: RemoteComment },
    /// Local change to an item that no longer exists remotely and cannot
    /// be created. Left pending.
    SkipMissingRemote { checklist: String, item: String },
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannedAction::SetItemState {
                checklist,
                item,
                state,
            } => write!(f, "push '{item}' in '{checklist}' as {}", state.as_str()),
            PlannedAction::AddComment { comment } => {
                write!(f, "push comment by {}", comment.author)
            }
            PlannedAction::PullItem {
                checklist,
                item,
                state: Some(state),
            } => write!(f, "pull '{item}' in '{checklist}' as {}", state.as_str()),
            PlannedAction::PullItem {
                checklist, item, ..
            } => write!(f, "remove '{item}' in '{checklist}' (gone remotely)"),
            PlannedAction::PullComment { comment } => {
                write!(f, "pull comment by {}", comment.author)
            }
            PlannedAction::SkipMissingRemote { checklist, item } => {
                write!(f, "skip '{item}' in '{checklist}' (no remote counterpart)")
            }
        }
    }
}

/// An entity flagged conflicting this cycle, with the annotation text
/// written into the local file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictFlag {
    pub key: EntityKey,
    pub message: String,
}

/// Output of one classification pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub pushes: Vec<PlannedAction>,
    pub pulls: Vec<PlannedAction>,
    pub skipped: Vec<PlannedAction>,
    pub conflicts: Vec<ConflictFlag>,
    /// Conflict/acknowledgement flags to clear from the record.
    pub resolved: Vec<EntityKey>,
}

impl Resolution {
    pub fn is_noop(&self) -> bool {
        self.pushes.is_empty()
            && self.pulls.is_empty()
            && self.skipped.is_empty()
            && self.conflicts.is_empty()
            && self.resolved.is_empty()
    }
}

/// Classify every changed entity and plan the cycle's actions.
pub fn classify(
    changes: &ChangeSet,
    record: &SyncStateRecord,
    policy: ConflictPolicy,
) -> Resolution {
    let mut resolution = Resolution::default();
    for change in &changes.items {
        classify_item(change, record, policy, &mut resolution);
    }
    for change in &changes.comments {
        classify_comment(change, &mut resolution);
    }
    resolution
}

fn classify_item(
    change: &ItemChange,
    record: &SyncStateRecord,
    policy: ConflictPolicy,
    out: &mut Resolution,
) {
    let key = change.key();
    match EntityState::from(change.disposition) {
        EntityState::Clean => {
            // Both sides already agree; the baseline update happens when
            // the orchestrator applies the (no-op) pull.
            if let Some(state) = change.remote {
                out.pulls.push(PlannedAction::PullItem {
                    checklist: change.checklist.clone(),
                    item: change.item.clone(),
                    state: Some(state),
                });
            }
            // A conflict flag outlives convergence; only acknowledgement
            // clears it.
            if record.acknowledged.contains(&key) {
                out.resolved.push(key);
            }
        }
        EntityState::LocalAhead => {
            if record.acknowledged.contains(&key) {
                out.resolved.push(key.clone());
            } else if record.conflicts.contains(&key) {
                // Still flagged from an earlier cycle; pushes stay
                // suppressed until the user acknowledges.
                out.conflicts.push(ConflictFlag {
                    key,
                    message: format!(
                        "Unacknowledged conflict on '{}'; local change not pushed",
                        change.item
                    ),
                });
                return;
            }
            match (change.local, change.remote) {
                (Some(state), Some(_)) => out.pushes.push(PlannedAction::SetItemState {
                    checklist: change.checklist.clone(),
                    item: change.item.clone(),
                    state,
                }),
                // Item exists only locally (or was recorded then removed
                // remotely while local matched): nothing to push to.
                _ => out.skipped.push(PlannedAction::SkipMissingRemote {
                    checklist: change.checklist.clone(),
                    item: change.item.clone(),
                }),
            }
        }
        EntityState::RemoteAhead => {
            out.pulls.push(PlannedAction::PullItem {
                checklist: change.checklist.clone(),
                item: change.item.clone(),
                state: change.remote,
            });
            if record.acknowledged.contains(&key) {
                out.resolved.push(key);
            }
        }
        EntityState::Conflicting => {
            if record.acknowledged.contains(&key) {
                // Acknowledged: adopt the remote value and clear the flag.
                out.pulls.push(PlannedAction::PullItem {
                    checklist: change.checklist.clone(),
                    item: change.item.clone(),
                    state: change.remote,
                });
                out.resolved.push(key);
                return;
            }
            match policy {
                ConflictPolicy::RemoteWins => {
                    match change.remote {
                        Some(state) => out.pulls.push(PlannedAction::PullItem {
                            checklist: change.checklist.clone(),
                            item: change.item.clone(),
                            state: Some(state),
                        }),
                        // Removed remotely while edited locally: keep the
                        // local item visible under its flag rather than
                        // silently dropping the user's edit.
                        None => {}
                    }
                    out.conflicts.push(ConflictFlag {
                        message: conflict_message(change),
                        key,
                    });
                }
                ConflictPolicy::LocalWins => match (change.local, change.remote) {
                    (Some(state), Some(_)) => out.pushes.push(PlannedAction::SetItemState {
                        checklist: change.checklist.clone(),
                        item: change.item.clone(),
                        state,
                    }),
                    _ => out.conflicts.push(ConflictFlag {
                        message: conflict_message(change),
                        key,
                    }),
                },
                ConflictPolicy::Skip => out.conflicts.push(ConflictFlag {
                    message: conflict_message(change),
                    key,
                }),
            }
        }
    }
}

fn conflict_message(change: &ItemChange) -> String {
    let side = |s: Option<ItemState>| match s {
        Some(state) => state.as_str(),
        None => "removed",
    };
    format!(
        "Conflict on '{}': local {} vs remote {}",
        change.item,
        side(change.local),
        side(change.remote)
    )
}

fn classify_comment(change: &CommentChange, out: &mut Resolution) {
    match change.disposition {
        Disposition::LocalOnly => {
            if let Some(comment) = &change.local {
                out.pushes.push(PlannedAction::AddComment {
                    comment: comment.clone(),
                });
            }
        }
        Disposition::RemoteOnly | Disposition::BothEqual => {
            if let Some(comment) = &change.remote {
                out.pulls.push(PlannedAction::PullComment {
                    comment: comment.clone(),
                });
            }
        }
        // Comment sets merge by union; single comments never conflict.
        Disposition::BothConflicting => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_change(
        disposition: Disposition,
        local: Option<ItemState>,
        remote: Option<ItemState>,
    ) -> ItemChange {
        ItemChange {
            checklist: "Steps".into(),
            item: "Write docs".into(),
            local,
            remote,
            last_known: None,
            disposition,
        }
    }

    fn changes_with(item: ItemChange) -> ChangeSet {
        ChangeSet {
            items: vec![item],
            comments: Vec::new(),
        }
    }

    #[test]
    fn test_local_ahead_becomes_push() {
        let changes = changes_with(item_change(
            Disposition::LocalOnly,
            Some(ItemState::Complete),
            Some(ItemState::Incomplete),
        ));
        let record = SyncStateRecord::new("c1");
        let resolution = classify(&changes, &record, ConflictPolicy::RemoteWins);
        assert_eq!(resolution.pushes.len(), 1);
        assert!(resolution.conflicts.is_empty());
        assert!(matches!(
            resolution.pushes[0],
            PlannedAction::SetItemState {
                state: ItemState::Complete,
                ..
            }
        ));
    }

    #[test]
    fn test_local_ahead_without_remote_entity_is_skipped() {
        let changes = changes_with(item_change(
            Disposition::LocalOnly,
            Some(ItemState::Incomplete),
            None,
        ));
        let record = SyncStateRecord::new("c1");
        let resolution = classify(&changes, &record, ConflictPolicy::RemoteWins);
        assert!(resolution.pushes.is_empty());
        assert_eq!(resolution.skipped.len(), 1);
    }

    #[test]
    fn test_remote_ahead_becomes_pull() {
        let changes = changes_with(item_change(
            Disposition::RemoteOnly,
            Some(ItemState::Incomplete),
            Some(ItemState::Complete),
        ));
        let record = SyncStateRecord::new("c1");
        let resolution = classify(&changes, &record, ConflictPolicy::RemoteWins);
        assert_eq!(resolution.pulls.len(), 1);
    }

    #[test]
    fn test_conflict_remote_wins_pulls_and_flags() {
        let changes = changes_with(item_change(
            Disposition::BothConflicting,
            Some(ItemState::Complete),
            Some(ItemState::Incomplete),
        ));
        let record = SyncStateRecord::new("c1");
        let resolution = classify(&changes, &record, ConflictPolicy::RemoteWins);
        assert_eq!(resolution.pulls.len(), 1);
        assert_eq!(resolution.conflicts.len(), 1);
        assert!(resolution.pushes.is_empty());
        assert!(resolution.conflicts[0].message.contains("local complete"));
    }

    #[test]
    fn test_conflict_local_wins_pushes() {
        let changes = changes_with(item_change(
            Disposition::BothConflicting,
            Some(ItemState::Complete),
            Some(ItemState::Incomplete),
        ));
        let record = SyncStateRecord::new("c1");
        let resolution = classify(&changes, &record, ConflictPolicy::LocalWins);
        assert_eq!(resolution.pushes.len(), 1);
        assert!(resolution.conflicts.is_empty());
    }

    #[test]
    fn test_conflict_skip_touches_neither_side() {
        let changes = changes_with(item_change(
            Disposition::BothConflicting,
            Some(ItemState::Complete),
            Some(ItemState::Incomplete),
        ));
        let record = SyncStateRecord::new("c1");
        let resolution = classify(&changes, &record, ConflictPolicy::Skip);
        assert!(resolution.pushes.is_empty());
        assert!(resolution.pulls.is_empty());
        assert_eq!(resolution.conflicts.len(), 1);
    }

    #[test]
    fn test_acknowledged_conflict_adopts_remote() {
        let change = item_change(
            Disposition::BothConflicting,
            Some(ItemState::Complete),
            Some(ItemState::Incomplete),
        );
        let mut record = SyncStateRecord::new("c1");
        record.acknowledged.insert(change.key());
        let resolution = classify(&changes_with(change), &record, ConflictPolicy::RemoteWins);
        assert_eq!(resolution.pulls.len(), 1);
        assert!(resolution.conflicts.is_empty());
        assert_eq!(resolution.resolved.len(), 1);
    }

    #[test]
    fn test_flagged_entity_excluded_from_push() {
        let change = item_change(
            Disposition::LocalOnly,
            Some(ItemState::Complete),
            Some(ItemState::Incomplete),
        );
        let mut record = SyncStateRecord::new("c1");
        record.conflicts.insert(change.key());
        let resolution = classify(&changes_with(change), &record, ConflictPolicy::RemoteWins);
        assert!(resolution.pushes.is_empty());
        assert_eq!(resolution.conflicts.len(), 1);
    }

    #[test]
    fn test_flag_survives_convergence_until_acknowledged() {
        let change = item_change(
            Disposition::BothEqual,
            Some(ItemState::Complete),
            Some(ItemState::Complete),
        );
        let mut record = SyncStateRecord::new("c1");
        record.conflicts.insert(change.key());
        let resolution = classify(
            &changes_with(change.clone()),
            &record,
            ConflictPolicy::RemoteWins,
        );
        assert!(resolution.resolved.is_empty());

        record.acknowledged.insert(change.key());
        let resolution = classify(&changes_with(change), &record, ConflictPolicy::RemoteWins);
        assert_eq!(resolution.resolved.len(), 1);
    }

    #[test]
    fn test_comment_sets_union() {
        let local = Comment {
            author: "Bob".into(),
            created_at: None,
            body: "mine".into(),
            remote_id: None,
        };
        let remote = RemoteComment {
            id: "cm1".into(),
            author: "Alice".into(),
            created_at: None,
            body: "theirs".into(),
        };
        let changes = ChangeSet {
            items: Vec::new(),
            comments: vec![
                CommentChange {
                    fingerprint: local.fingerprint(),
                    local: Some(local),
                    remote: None,
                    disposition: Disposition::LocalOnly,
                },
                CommentChange {
                    fingerprint: remote.fingerprint(),
                    local: None,
                    remote: Some(remote),
                    disposition: Disposition::RemoteOnly,
                },
            ],
        };
        let record = SyncStateRecord::new("c1");
        let resolution = classify(&changes, &record, ConflictPolicy::RemoteWins);
        assert_eq!(resolution.pushes.len(), 1);
        assert_eq!(resolution.pulls.len(), 1);
        assert!(resolution.conflicts.is_empty());
    }
}
