/// Sync state store: one JSON record per card, keyed by remote card id.
///
/// The record is the engine's memory of the last reconciled state: the
/// name→id caches, the last known checkitem states, and the last known
/// comment fingerprint set. It is updated only after a remote mutation is
/// confirmed, never speculatively, and every `put` is an atomic replace so
/// a crash mid-cycle loses at most the in-flight mutation.
///
/// Records are never deleted automatically. When the remote counterpart
/// vanishes the card is flagged orphaned and the record is retained for
/// audit.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::{EntityKey, ItemState, SyncStatus};

/// Per-card reconciliation metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStateRecord {
    pub card_id: String,
    /// checklist name -> remote checklist id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checklist_ids: BTreeMap<String, String>,
    /// checklist name -> item text -> remote checkitem id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checkitem_ids: BTreeMap<String, BTreeMap<String, String>>,
    /// comment fingerprint -> remote comment id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub comment_ids: BTreeMap<String, String>,
    /// Last known checkitem states, checklist name -> item text -> state.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub item_states: BTreeMap<String, BTreeMap<String, ItemState>>,
    /// Fingerprints of comments last seen present on both sides.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub known_comments: BTreeSet<String>,
    /// Entities currently flagged conflicting; excluded from pushes.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub conflicts: BTreeSet<EntityKey>,
    /// Conflicts the user has acknowledged; resolved (remote wins) next cycle.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub acknowledged: BTreeSet<EntityKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_local_sync: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_remote_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl SyncStateRecord {
    pub fn new(card_id: impl Into<String>) -> Self {
        SyncStateRecord {
            card_id: card_id.into(),
            ..Default::default()
        }
    }

    pub fn last_known_item_state(&self, checklist: &str, item: &str) -> Option<ItemState> {
        self.item_states
            .get(checklist)
            .and_then(|m| m.get(item))
            .copied()
    }

    pub fn set_item_state(&mut self, checklist: &str, item: &str, state: ItemState) {
        self.item_states
            .entry(checklist.to_string())
            .or_default()
            .insert(item.to_string(), state);
    }

    pub fn checkitem_id(&self, checklist: &str, item: &str) -> Option<&str> {
        self.checkitem_ids
            .get(checklist)
            .and_then(|m| m.get(item))
            .map(String::as_str)
    }

    /// Record a confirmed comment push: id mapping plus known-set membership.
    pub fn record_comment(&mut self, fingerprint: &str, comment_id: &str) {
        self.comment_ids
            .insert(fingerprint.to_string(), comment_id.to_string());
        self.known_comments.insert(fingerprint.to_string());
    }

    /// Whether a comment fingerprint is already synced.
    pub fn knows_comment(&self, fingerprint: &str) -> bool {
        self.known_comments.contains(fingerprint) || self.comment_ids.contains_key(fingerprint)
    }
}

/// Directory-backed store of [`SyncStateRecord`]s with per-card cycle locks.
pub struct StateStore {
    dir: PathBuf,
    /// Per-card mutual exclusion for sync cycles. Process-local, not
    /// distributed.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        StateStore {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn record_path(&self, card_id: &str) -> PathBuf {
        // Card ids are remote identifiers; keep only path-safe chars anyway.
        let safe: String = card_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    /// Acquire the cycle lock handle for a card. Callers hold the guard for
    /// the whole reconciliation cycle.
    pub fn lock(&self, card_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(card_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn get(&self, card_id: &str) -> Result<Option<SyncStateRecord>, SyncError> {
        let path = self.record_path(card_id);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| SyncError::State(format!("corrupt record {path:?}: {e}")))
    }

    /// Atomically persist a record. Written pretty-printed so the state is
    /// human-inspectable.
    pub fn put(&self, record: &SyncStateRecord) -> Result<(), SyncError> {
        let path = self.record_path(&record.card_id);
        let content = serde_json::to_string_pretty(record)
            .map_err(|e| SyncError::State(format!("serialize record: {e}")))?;
        super::atomic_write(&path, &content)?;
        log::debug!(
            "[boardsync.state] persisted record for card {} (status {})",
            record.card_id,
            record.sync_status
        );
        Ok(())
    }

    /// All persisted records, for status reporting.
    pub fn list(&self) -> Result<Vec<SyncStateRecord>, SyncError> {
        let mut records = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<SyncStateRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => {
                    log::warn!("[boardsync.state] skipping corrupt record {path:?}: {e}");
                }
            }
        }
        records.sort_by(|a, b| a.card_id.cmp(&b.card_id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        (dir, store)
    }

    #[test]
    fn test_get_missing_is_none() {
        let (_dir, store) = store();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_put_get_round_trip() {
        let (_dir, store) = store();
        let mut record = SyncStateRecord::new("card1");
        record.set_item_state("Steps", "Write tests", ItemState::Complete);
        record.record_comment("fp1", "cm1");
        record.sync_status = SyncStatus::Pending;
        store.put(&record).unwrap();

        let loaded = store.get("card1").unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(
            loaded.last_known_item_state("Steps", "Write tests"),
            Some(ItemState::Complete)
        );
        assert!(loaded.knows_comment("fp1"));
    }

    #[test]
    fn test_put_overwrites_atomically() {
        let (_dir, store) = store();
        let mut record = SyncStateRecord::new("card1");
        store.put(&record).unwrap();
        record.sync_status = SyncStatus::Conflict;
        store.put(&record).unwrap();
        let loaded = store.get("card1").unwrap().unwrap();
        assert_eq!(loaded.sync_status, SyncStatus::Conflict);
    }

    #[test]
    fn test_list_returns_all_records() {
        let (_dir, store) = store();
        store.put(&SyncStateRecord::new("b")).unwrap();
        store.put(&SyncStateRecord::new("a")).unwrap();
        let records = store.list().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].card_id, "a");
    }

    #[test]
    fn test_conflict_keys_round_trip() {
        let (_dir, store) = store();
        let mut record = SyncStateRecord::new("card1");
        record.conflicts.insert(EntityKey::Item {
            checklist: "Steps".into(),
            item: "Tag".into(),
        });
        store.put(&record).unwrap();
        let loaded = store.get("card1").unwrap().unwrap();
        assert_eq!(loaded.conflicts.len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_lock_is_exclusive_per_card() {
        let (_dir, store) = store();
        let lock = store.lock("card1");
        let guard = lock.lock().await;
        assert!(store.lock("card1").try_lock().is_err());
        assert!(store.lock("card2").try_lock().is_ok());
        drop(guard);
        assert!(store.lock("card1").try_lock().is_ok());
    }
}
