pub mod files;
pub mod state;

use std::fs;
use std::io::Write;
use std::path::Path;

/// Atomic write with fsync: write to .tmp, fsync, rename, fsync directory.
/// Every persisted artifact (card files, state records) goes through this,
/// so a crash can never leave a partially written file behind.
pub(crate) fn atomic_write(path: &Path, content: &str) -> Result<(), std::io::Error> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp_path = path.with_extension("boardsync.tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;

    // fsync directory for rename durability
    if let Some(dir) = path.parent() {
        if let Ok(d) = fs::File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}
