pub mod rate_limit;
pub mod retry;
pub mod trello;

use async_trait::async_trait;

use crate::types::{BoardSummary, CardSummary, ItemState, ListSummary, RemoteSnapshot};

/// Errors from the remote board service.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote entity not found: {0}")]
    NotFound(String),

    #[error("rate limited by remote service")]
    RateLimited,

    #[error("remote service error: HTTP {0}")]
    Http(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Transient errors are retried with backoff; everything else escalates
    /// immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::RateLimited | RemoteError::Network(_) => true,
            RemoteError::Http(code) => *code >= 500,
            RemoteError::NotFound(_) | RemoteError::Protocol(_) => false,
        }
    }
}

/// Collaborator seam for the remote task-board service.
///
/// `set_checkitem_state` is idempotent and safe to retry verbatim.
/// `add_comment` is not; callers guard it with a pre-push fingerprint check
/// against both the state record and the freshly fetched snapshot.
#[async_trait]
pub trait RemoteBoardClient: Send + Sync {
    async fn fetch_card_snapshot(&self, card_id: &str) -> Result<RemoteSnapshot, RemoteError>;

    /// Create a comment; returns the new remote comment id.
    async fn add_comment(&self, card_id: &str, text: &str) -> Result<String, RemoteError>;

    async fn set_checkitem_state(
        &self,
        card_id: &str,
        checkitem_id: &str,
        state: ItemState,
    ) -> Result<(), RemoteError>;

    // Board discovery, used by the CLI and the board-level pull.
    async fn list_boards(&self) -> Result<Vec<BoardSummary>, RemoteError>;
    async fn board(&self, board_id: &str) -> Result<BoardSummary, RemoteError>;
    async fn board_lists(&self, board_id: &str) -> Result<Vec<ListSummary>, RemoteError>;
    async fn cards_in_list(&self, list_id: &str) -> Result<Vec<CardSummary>, RemoteError>;
}
