// backupingest/src/restore/archival.rs
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::utils::archive_timestamp;

pub const ARCHIVE_DIR_NAME: &str = "archived";

/// Moves a processed artifact into `archived/` beside it as
/// `<stem>_<timestamp><ext>`.
pub fn archive_processed_file(file_path: &Path) -> io::Result<PathBuf> {
    archive_with_timestamp(file_path, &archive_timestamp())
}

fn archive_with_timestamp(file_path: &Path, timestamp: &str) -> io::Result<PathBuf> {
    let parent = file_path.parent().unwrap_or_else(|| Path::new("."));
    let archive_dir = parent.join(ARCHIVE_DIR_NAME);
    std::fs::create_dir_all(&archive_dir)?;

    let stem = file_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let ext = file_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut archived_path = archive_dir.join(format!("{}_{}{}", stem, timestamp, ext));
    let mut suffix = 1;
    while archived_path.exists() {
        archived_path = archive_dir.join(format!("{}_{}_{}{}", stem, timestamp, suffix, ext));
        suffix += 1;
    }

    move_file(file_path, &archived_path)?;
    info!("Moved {} to {}", file_path.display(), archived_path.display());
    Ok(archived_path)
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        // Different filesystem: copy then remove.
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}
