/// Sync orchestrator: one idempotent reconciliation cycle per card.
///
/// A cycle holds the card's cycle lock end to end: load the local file and
/// the state record, fetch a fresh remote snapshot, detect per-entity
/// deltas, classify them, issue one remote mutation per push-eligible
/// entity, and persist the record after every confirmed mutation so a
/// crash loses at most the in-flight call. The local file is rewritten
/// once, at the end, with conflict annotations for every flagged entity.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::config::{Config, PolicyConfig};
use crate::error::SyncError;
use crate::fingerprint;
use crate::parser::CardFile;
use crate::remote::rate_limit::RateLimiter;
use crate::remote::retry::{with_retry, RetryConfig};
use crate::remote::{RemoteBoardClient, RemoteError};
use crate::render::ConflictAnnotation;
use crate::storage::files;
use crate::storage::state::{StateStore, SyncStateRecord};
use crate::sync::conflict::{classify, PlannedAction, Resolution};
use crate::sync::detect::{detect, validate_snapshot};
use crate::sync::identity::{adopt_snapshot_ids, apply_ids, bootstrap_record};
use crate::types::{
    BoardSummary, Card, CheckItem, Checklist, Comment, EntityKey, ItemState, ListSummary,
    RemoteComment, RemoteSnapshot, SyncStatus,
};

/// What a cycle is allowed to do to the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleMode {
    /// Full reconciliation: pull and push.
    Sync,
    /// Pull only; local-ahead entities are left pending.
    Pull,
}

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub card_id: String,
    pub path: PathBuf,
    pub status: SyncStatus,
    pub pushed: usize,
    pub pulled: usize,
    pub pending: usize,
    pub conflicts: usize,
    /// Human-readable planned actions; populated on dry runs.
    pub planned: Vec<String>,
    pub dry_run: bool,
}

/// Outcome of a board-level pull.
#[derive(Debug, Clone, Default)]
pub struct BoardPullReport {
    pub total: usize,
    pub created: usize,
    pub refreshed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub planned: Vec<String>,
}

/// Outcome of a sync over every card file under the mirror root.
#[derive(Debug, Default)]
pub struct MirrorSyncReport {
    pub reports: Vec<CycleReport>,
    pub failures: Vec<(PathBuf, SyncError)>,
}

pub struct SyncEngine {
    client: Arc<dyn RemoteBoardClient>,
    state: StateStore,
    policy: PolicyConfig,
    retry: RetryConfig,
    limiter: RateLimiter,
}

impl SyncEngine {
    pub fn new(
        client: Arc<dyn RemoteBoardClient>,
        state: StateStore,
        policy: PolicyConfig,
        retry: RetryConfig,
        limiter: RateLimiter,
    ) -> Self {
        SyncEngine {
            client,
            state,
            policy,
            retry,
            limiter,
        }
    }

    pub fn from_config(client: Arc<dyn RemoteBoardClient>, config: &Config) -> Self {
        SyncEngine::new(
            client,
            StateStore::new(config.state_dir()),
            config.policy.clone(),
            config.retry.to_retry_config(),
            RateLimiter::new(
                config.rate_limit.requests,
                std::time::Duration::from_secs(config.rate_limit.window_secs),
            ),
        )
    }

    /// Fully reconcile one card file, pushing local changes.
    pub async fn sync_card(&self, path: &Path, dry_run: bool) -> Result<CycleReport, SyncError> {
        self.run_cycle(path, CycleMode::Sync, dry_run).await
    }

    /// Refresh one card file from the remote side without pushing.
    pub async fn pull_card(&self, path: &Path, dry_run: bool) -> Result<CycleReport, SyncError> {
        self.run_cycle(path, CycleMode::Pull, dry_run).await
    }

    /// Sync every card file under the mirror root, optionally restricted
    /// to cards of one board. Per-card failures are collected rather than
    /// aborting the walk.
    pub async fn sync_all(
        &self,
        config: &Config,
        board_id: Option<&str>,
        dry_run: bool,
    ) -> MirrorSyncReport {
        let mut report = MirrorSyncReport::default();
        let paths = match collect_card_files(&config.mirror_root) {
            Ok(p) => p,
            Err(e) => {
                report.failures.push((config.mirror_root.clone(), e));
                return report;
            }
        };
        for path in paths {
            if let Some(board_id) = board_id {
                match files::read_card(&path) {
                    Ok(file) if file.card.board_id.as_deref() != Some(board_id) => continue,
                    Ok(_) => {}
                    Err(e) => {
                        report.failures.push((path, e));
                        continue;
                    }
                }
            }
            match self.sync_card(&path, dry_run).await {
                Ok(r) => report.reports.push(r),
                Err(e) => {
                    log::error!("[boardsync.engine] sync failed for {path:?}: {e}");
                    report.failures.push((path, e));
                }
            }
        }
        report
    }

    /// Pull every card of a board into the mirror, creating files for
    /// cards not mirrored yet and refreshing stale ones. Cards whose
    /// remote activity timestamp is not newer than the record are skipped
    /// without a snapshot fetch.
    pub async fn pull_board(
        &self,
        board_id: &str,
        config: &Config,
        dry_run: bool,
    ) -> Result<BoardPullReport, SyncError> {
        let board = self
            .remote_fetch("fetch board", || self.client.board(board_id))
            .await?;
        let lists = self
            .remote_fetch("fetch board lists", || self.client.board_lists(board_id))
            .await?;
        let org = board.organization.as_deref().unwrap_or("personal");

        let mut report = BoardPullReport::default();
        for list in lists.iter().filter(|l| !l.closed) {
            let cards = self
                .remote_fetch("fetch list cards", || self.client.cards_in_list(&list.id))
                .await?;
            for card in cards {
                report.total += 1;
                let path = config.card_path(org, &board.name, &list.name, &card.name);
                let fresh = match (self.state.get(&card.id)?, card.last_activity) {
                    (Some(record), Some(activity)) => record
                        .last_remote_sync
                        .is_some_and(|last| activity <= last),
                    _ => false,
                };
                if fresh && path.is_file() {
                    report.skipped += 1;
                    continue;
                }
                if dry_run {
                    let verb = if path.is_file() { "refresh" } else { "create" };
                    report.planned.push(format!("{verb} {path:?} ({})", card.name));
                    continue;
                }
                let outcome = if path.is_file() {
                    self.pull_card(&path, false).await.map(|_| false)
                } else {
                    self.create_card_file(&card.id, &path, &board, list)
                        .await
                        .map(|_| true)
                };
                match outcome {
                    Ok(true) => report.created += 1,
                    Ok(false) => report.refreshed += 1,
                    Err(e) => {
                        log::error!(
                            "[boardsync.engine] pull failed for card {} ({}): {e}",
                            card.id,
                            card.name
                        );
                        report.failed += 1;
                    }
                }
            }
        }
        log::info!(
            "[boardsync.engine] board {} pull: {} cards, {} created, {} refreshed, {} skipped, {} failed",
            board_id,
            report.total,
            report.created,
            report.refreshed,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    /// All persisted state records, for status reporting.
    pub fn status(&self) -> Result<Vec<SyncStateRecord>, SyncError> {
        self.state.list()
    }

    /// Acknowledge conflicts on a card: either one entity or all of them.
    /// Acknowledged entities adopt the remote value on the next cycle.
    pub async fn acknowledge(
        &self,
        card_id: &str,
        key: Option<&EntityKey>,
    ) -> Result<usize, SyncError> {
        let lock = self.state.lock(card_id);
        let _guard = lock.lock().await;
        let mut record = self
            .state
            .get(card_id)?
            .ok_or_else(|| SyncError::State(format!("no state record for card {card_id}")))?;
        let keys: Vec<EntityKey> = match key {
            Some(k) => record.conflicts.iter().filter(|c| *c == k).cloned().collect(),
            None => record.conflicts.iter().cloned().collect(),
        };
        for k in &keys {
            record.conflicts.remove(k);
            record.acknowledged.insert(k.clone());
            log::info!("[boardsync.engine] acknowledged conflict on {k} for card {card_id}");
        }
        if !keys.is_empty() {
            self.state.put(&record)?;
        }
        Ok(keys.len())
    }

    async fn run_cycle(
        &self,
        path: &Path,
        mode: CycleMode,
        dry_run: bool,
    ) -> Result<CycleReport, SyncError> {
        // The pre-lock read only identifies the card. The content the
        // cycle acts on is re-read under the lock, so a concurrent cycle
        // on the same card can never write back a stale view.
        let card_id = files::read_card(path)?.card.remote_id;

        let lock = self.state.lock(&card_id);
        let _guard = lock.lock().await;

        let mut file = files::read_card(path)?;

        let mut record = match self.state.get(&card_id)? {
            Some(record) => record,
            None => {
                log::info!(
                    "[boardsync.engine] no state record for card {card_id}, bootstrapping from frontmatter"
                );
                bootstrap_record(&file)
            }
        };

        let snapshot = match self
            .remote_fetch("fetch card snapshot", || {
                self.client.fetch_card_snapshot(&card_id)
            })
            .await
        {
            Ok(snapshot) => snapshot,
            Err(SyncError::Remote(RemoteError::NotFound(_))) => {
                log::warn!("[boardsync.engine] card {card_id} is gone remotely, marking orphaned");
                record.sync_status = SyncStatus::Orphaned;
                self.state.put(&record)?;
                return Ok(CycleReport {
                    card_id,
                    path: path.to_path_buf(),
                    status: SyncStatus::Orphaned,
                    pushed: 0,
                    pulled: 0,
                    pending: 0,
                    conflicts: record.conflicts.len(),
                    planned: Vec::new(),
                    dry_run,
                });
            }
            Err(e) => {
                record.sync_status = SyncStatus::Error;
                self.state.put(&record)?;
                return Err(e);
            }
        };
        validate_snapshot(&snapshot)?;
        adopt_snapshot_ids(&mut record, &snapshot);

        let changes = detect(&file.card, &snapshot, &record);
        let resolution = classify(&changes, &record, self.policy.conflict);

        if dry_run {
            return Ok(self.dry_run_report(&card_id, path, &record, &resolution));
        }

        let (pushes, suppressed) = match mode {
            CycleMode::Sync => (resolution.pushes.clone(), 0),
            CycleMode::Pull => (Vec::new(), resolution.pushes.len()),
        };

        let mut pushed = 0usize;
        let mut pending = suppressed + resolution.skipped.len();
        let mut mutation_failed = false;
        for (i, action) in pushes.iter().enumerate() {
            let confirmed = match action {
                PlannedAction::SetItemState {
                    checklist,
                    item,
                    state,
                } => self
                    .push_item_state(&card_id, &mut record, checklist, item, *state)
                    .await,
                PlannedAction::AddComment { comment } => {
                    self.push_new_comment(&card_id, &mut record, comment).await
                }
                _ => Ok(()),
            };
            match confirmed {
                Ok(()) => pushed += 1,
                Err(e) => {
                    log::error!("[boardsync.engine] mutation failed for card {card_id}: {e}");
                    mutation_failed = true;
                    pending += pushes.len() - i;
                    break;
                }
            }
        }

        let mut pulled = 0usize;
        for action in &resolution.pulls {
            match action {
                PlannedAction::PullItem {
                    checklist,
                    item,
                    state,
                } => apply_pull_item(&mut file.card, &mut record, checklist, item, *state),
                PlannedAction::PullComment { comment } => {
                    apply_pull_comment(&mut file.card, &mut record, comment)
                }
                _ => continue,
            }
            pulled += 1;
        }

        for action in &resolution.skipped {
            if self.policy.allow_remote_creation {
                log::warn!(
                    "[boardsync.engine] {action}: remote checkitem creation is configured but not supported, item left pending"
                );
            } else {
                log::debug!("[boardsync.engine] {action}");
            }
        }

        for key in &resolution.resolved {
            record.conflicts.remove(key);
        }
        // An acknowledgement is good for exactly one cycle. Any entry not
        // consumed above had no matching change this cycle; keeping it
        // would silently resolve a later, unrelated conflict on the same
        // entity.
        record.acknowledged.clear();
        let mut messages: HashMap<EntityKey, String> = HashMap::new();
        for flag in &resolution.conflicts {
            record.conflicts.insert(flag.key.clone());
            messages.insert(flag.key.clone(), flag.message.clone());
        }

        let mut severities = vec![SyncStatus::Synced];
        if pending > 0 {
            severities.push(SyncStatus::Pending);
        }
        if !record.conflicts.is_empty() {
            severities.push(SyncStatus::Conflict);
        }
        if mutation_failed {
            severities.push(SyncStatus::Error);
        }
        let status = severities.into_iter().max().unwrap_or(SyncStatus::Synced);

        let now = Utc::now();
        record.last_local_sync = Some(now);
        record.last_remote_sync = snapshot.last_activity.or(Some(now));
        record.sync_status = status;
        self.state.put(&record)?;

        apply_ids(&mut file.card, &record);
        file.card.last_synced = Some(now);
        file.card.sync_status = status;
        let annotations: Vec<ConflictAnnotation> = record
            .conflicts
            .iter()
            .map(|key| ConflictAnnotation {
                key: key.clone(),
                message: messages.get(key).cloned().unwrap_or_else(|| {
                    format!("Unresolved conflict on {key}; acknowledge to clear")
                }),
            })
            .collect();
        files::write_card(path, &file, &annotations)?;

        log::info!(
            "[boardsync.engine] card {card_id}: {status}, {pushed} pushed, {pulled} pulled, {pending} pending, {} conflicts",
            record.conflicts.len()
        );
        Ok(CycleReport {
            card_id,
            path: path.to_path_buf(),
            status,
            pushed,
            pulled,
            pending,
            conflicts: record.conflicts.len(),
            planned: Vec::new(),
            dry_run: false,
        })
    }

    fn dry_run_report(
        &self,
        card_id: &str,
        path: &Path,
        record: &SyncStateRecord,
        resolution: &Resolution,
    ) -> CycleReport {
        let planned: Vec<String> = resolution
            .pushes
            .iter()
            .chain(&resolution.pulls)
            .chain(&resolution.skipped)
            .map(ToString::to_string)
            .chain(
                resolution
                    .conflicts
                    .iter()
                    .map(|flag| format!("flag conflict: {}", flag.message)),
            )
            .collect();
        CycleReport {
            card_id: card_id.to_string(),
            path: path.to_path_buf(),
            status: record.sync_status,
            pushed: 0,
            pulled: 0,
            pending: resolution.pushes.len() + resolution.skipped.len(),
            conflicts: resolution.conflicts.len(),
            planned,
            dry_run: true,
        }
    }

    /// Push one checkitem state; the record is persisted only after the
    /// remote confirms. Safe to retry verbatim.
    async fn push_item_state(
        &self,
        card_id: &str,
        record: &mut SyncStateRecord,
        checklist: &str,
        item: &str,
        state: ItemState,
    ) -> Result<(), SyncError> {
        let Some(checkitem_id) = record.checkitem_id(checklist, item).map(str::to_string) else {
            return Err(SyncError::State(format!(
                "no remote id for item '{item}' in checklist '{checklist}'"
            )));
        };
        with_retry(&self.retry, "set checkitem state", || async {
            self.limiter.acquire().await;
            self.client
                .set_checkitem_state(card_id, &checkitem_id, state)
                .await
        })
        .await?;
        record.set_item_state(checklist, item, state);
        self.state.put(record)?;
        Ok(())
    }

    /// Push one comment. Comment creation is not idempotent, so after an
    /// ambiguous (transient) failure the card is re-fetched and the body
    /// looked for before the call is repeated.
    async fn push_new_comment(
        &self,
        card_id: &str,
        record: &mut SyncStateRecord,
        comment: &Comment,
    ) -> Result<(), SyncError> {
        let fp = comment.fingerprint();
        if record.knows_comment(&fp) {
            return Ok(());
        }
        let comment_id = self.add_comment_guarded(card_id, comment).await?;
        record.record_comment(&fp, &comment_id);
        self.state.put(record)?;
        Ok(())
    }

    async fn add_comment_guarded(
        &self,
        card_id: &str,
        comment: &Comment,
    ) -> Result<String, RemoteError> {
        let body_norm = fingerprint::normalize(&comment.body);
        let mut attempt: u32 = 0;
        loop {
            self.limiter.acquire().await;
            match self.client.add_comment(card_id, &comment.body).await {
                Ok(id) => return Ok(id),
                Err(err) if err.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    log::warn!(
                        "[boardsync.engine] add comment to {card_id} failed ({err}), checking for delivery before retry"
                    );
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                    // The failed call may still have landed remotely.
                    self.limiter.acquire().await;
                    if let Ok(snapshot) = self.client.fetch_card_snapshot(card_id).await {
                        if let Some(existing) = snapshot
                            .comments
                            .iter()
                            .find(|c| fingerprint::normalize(&c.body) == body_norm)
                        {
                            log::info!(
                                "[boardsync.engine] comment already delivered to {card_id} as {}",
                                existing.id
                            );
                            return Ok(existing.id.clone());
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn remote_fetch<T, F, Fut>(&self, operation: &str, f: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RemoteError>>,
    {
        let result = with_retry(&self.retry, operation, || async {
            self.limiter.acquire().await;
            f().await
        })
        .await?;
        Ok(result)
    }

    /// Materialize a card that exists remotely but has no local mirror
    /// yet. The remote snapshot becomes both the file content and the
    /// reconciliation baseline.
    async fn create_card_file(
        &self,
        card_id: &str,
        path: &Path,
        board: &BoardSummary,
        list: &ListSummary,
    ) -> Result<(), SyncError> {
        let lock = self.state.lock(card_id);
        let _guard = lock.lock().await;

        let snapshot = self
            .remote_fetch("fetch card snapshot", || {
                self.client.fetch_card_snapshot(card_id)
            })
            .await?;
        validate_snapshot(&snapshot)?;

        let now = Utc::now();
        let mut record = SyncStateRecord::new(card_id);
        adopt_snapshot_ids(&mut record, &snapshot);
        for checklist in &snapshot.checklists {
            for item in &checklist.items {
                record.set_item_state(&checklist.name, &item.name, item.state);
            }
        }
        for comment in &snapshot.comments {
            record.record_comment(&comment.fingerprint(), &comment.id);
        }
        record.last_local_sync = Some(now);
        record.last_remote_sync = snapshot.last_activity.or(Some(now));
        record.sync_status = SyncStatus::Synced;

        let mut card = card_from_snapshot(&snapshot, path, board, list);
        card.last_synced = Some(now);
        apply_ids(&mut card, &record);

        files::write_card(
            path,
            &CardFile {
                card,
                opaque_sections: Vec::new(),
            },
            &[],
        )?;
        self.state.put(&record)?;
        log::info!("[boardsync.engine] created mirror file {path:?} for card {card_id}");
        Ok(())
    }
}

fn card_from_snapshot(
    snapshot: &RemoteSnapshot,
    path: &Path,
    board: &BoardSummary,
    list: &ListSummary,
) -> Card {
    Card {
        remote_id: snapshot.card_id.clone(),
        title: snapshot.name.clone(),
        description: snapshot.description.clone(),
        board: Some(board.name.clone()),
        board_id: Some(board.id.clone()),
        list: Some(list.name.clone()),
        list_id: Some(list.id.clone()),
        url: snapshot.url.clone(),
        local_path: path.to_path_buf(),
        checklists: snapshot
            .checklists
            .iter()
            .map(|c| Checklist {
                name: c.name.clone(),
                remote_id: Some(c.id.clone()),
                items: c
                    .items
                    .iter()
                    .map(|i| CheckItem {
                        text: i.name.clone(),
                        remote_id: Some(i.id.clone()),
                        state: i.state,
                    })
                    .collect(),
            })
            .collect(),
        comments: snapshot
            .comments
            .iter()
            .map(|c| Comment {
                author: c.author.clone(),
                created_at: c.created_at,
                body: c.body.clone(),
                remote_id: Some(c.id.clone()),
            })
            .collect(),
        last_synced: None,
        sync_status: SyncStatus::Synced,
        extra: Default::default(),
    }
}

fn apply_pull_item(
    card: &mut Card,
    record: &mut SyncStateRecord,
    checklist: &str,
    item: &str,
    state: Option<ItemState>,
) {
    match state {
        Some(state) => {
            let idx = match card.checklists.iter().position(|c| c.name == checklist) {
                Some(i) => i,
                None => {
                    card.checklists.push(Checklist {
                        name: checklist.to_string(),
                        remote_id: None,
                        items: Vec::new(),
                    });
                    card.checklists.len() - 1
                }
            };
            let list = &mut card.checklists[idx];
            match list.items.iter_mut().find(|i| i.text == item) {
                Some(existing) => existing.state = state,
                None => list.items.push(CheckItem {
                    text: item.to_string(),
                    remote_id: None,
                    state,
                }),
            }
            record.set_item_state(checklist, item, state);
        }
        None => {
            if let Some(list) = card.checklists.iter_mut().find(|c| c.name == checklist) {
                list.items.retain(|i| i.text != item);
            }
            if let Some(states) = record.item_states.get_mut(checklist) {
                states.remove(item);
                if states.is_empty() {
                    record.item_states.remove(checklist);
                }
            }
        }
    }
}

fn apply_pull_comment(card: &mut Card, record: &mut SyncStateRecord, remote: &RemoteComment) {
    let fp = remote.fingerprint();
    if !card.comments.iter().any(|c| c.fingerprint() == fp) {
        card.comments.push(Comment {
            author: remote.author.clone(),
            created_at: remote.created_at,
            body: remote.body.clone(),
            remote_id: Some(remote.id.clone()),
        });
    }
    record.record_comment(&fp, &remote.id);
}

/// All markdown files under the mirror root, skipping dot directories.
fn collect_card_files(root: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
