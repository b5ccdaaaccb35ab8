use crate::remote::RemoteError;

/// Errors raised by the reconciliation engine and its stores.
///
/// `Validation` is fatal for the card and never retried. `Remote` carries
/// the transient/permanent distinction (see [`RemoteError::is_transient`]).
/// A remotely deleted card is not an error at all: the engine marks the
/// card orphaned and leaves the local file untouched.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("validation failed for card {card}: {reason}")]
    Validation { card: String, reason: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("state store error: {0}")]
    State(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn validation(card: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Validation {
            card: card.into(),
            reason: reason.into(),
        }
    }
}
