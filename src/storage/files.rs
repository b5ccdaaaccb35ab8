/// Card file store: reads and writes the local markdown representation.
///
/// Thin wrapper over [`crate::parser`] and [`crate::render`] with atomic
/// replace semantics. The engine holds the per-card cycle lock while using
/// this, so the file is single-writer for the duration of one cycle.
use std::fs;
use std::path::Path;

use crate::error::SyncError;
use crate::parser::{self, CardFile};
use crate::render::{self, ConflictAnnotation};

/// Read and parse a card file.
pub fn read_card(path: &Path) -> Result<CardFile, SyncError> {
    let content = fs::read_to_string(path)?;
    parser::parse_card(&content, path)
}

/// Render and atomically write a card file.
pub fn write_card(
    path: &Path,
    file: &CardFile,
    annotations: &[ConflictAnnotation],
) -> Result<(), SyncError> {
    let content = render::render_card(file, annotations);
    super::atomic_write(path, &content)?;
    log::debug!("[boardsync.files] wrote card file {:?}", path);
    Ok(())
}
