/// boardsync keeps local markdown mirrors of remote task-board cards in
/// sync, both directions, with per-entity conflict detection.
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod parser;
pub mod remote;
pub mod render;
pub mod storage;
pub mod sync;
pub mod types;

pub use error::SyncError;
