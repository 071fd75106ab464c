pub mod logger;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use which::which;

/// Finds the first of `candidates` available in the system PATH.
pub fn find_executable(candidates: &[&str]) -> Result<PathBuf> {
    candidates
        .iter()
        .find_map(|name| which(name).ok())
        .with_context(|| {
            format!(
                "None of the executables {:?} were found in PATH. Please install one of them.",
                candidates
            )
        })
}

/// Seconds since the Unix epoch, used for generated names.
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Local timestamp suffix for archived files, e.g. `20240131_235959`.
pub fn archive_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Base name of a path, or an empty string.
pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Returns the configured extension that `file_name` ends with (case-insensitive).
///
/// The longest match wins so that `.tar.gz` is preferred over `.gz`.
pub fn matching_extension<'a>(file_name: &str, extensions: &'a [String]) -> Option<&'a str> {
    let lower = file_name.to_lowercase();
    extensions
        .iter()
        .filter(|ext| lower.ends_with(&ext.to_lowercase()))
        .max_by_key(|ext| ext.len())
        .map(|ext| ext.as_str())
}
