// backupingest/src/restore/db_restore.rs
use serde::Serialize;
use tracing::info;

use crate::errors::{RestoreError, Result};
use crate::restore::session::DatabaseSession;
use crate::utils::unix_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Data,
    Log,
}

impl FileKind {
    /// Maps the `Type` column of `RESTORE FILELISTONLY` (`L` is the log).
    pub fn from_type_code(code: &str) -> Self {
        if code.trim().eq_ignore_ascii_case("L") {
            FileKind::Log
        } else {
            FileKind::Data
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Log => ".ldf",
            FileKind::Data => ".mdf",
        }
    }
}

/// One logical file described inside a backup image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileManifestEntry {
    pub logical_name: String,
    pub kind: FileKind,
}

impl FileManifestEntry {
    pub fn new(logical_name: impl Into<String>, kind: FileKind) -> Self {
        Self {
            logical_name: logical_name.into(),
            kind,
        }
    }
}

/// Reads the backup's file manifest; an empty manifest means the file is not
/// a usable backup.
pub async fn read_manifest(
    session: &dyn DatabaseSession,
    backup_path: &str,
) -> Result<Vec<FileManifestEntry>> {
    info!("Reading backup file information from {}", backup_path);
    let entries = session.file_list(backup_path).await?;
    if entries.is_empty() {
        return Err(RestoreError::NoManifest(backup_path.to_string()));
    }
    info!("Backup contains {} files", entries.len());
    Ok(entries)
}

pub fn fallback_database_name() -> String {
    format!("restored_db_{}", unix_timestamp())
}

/// Explicit name, else the first logical name, else a generated one.
pub fn derive_database_name(manifest: &[FileManifestEntry], explicit_name: Option<&str>) -> String {
    if let Some(name) = explicit_name.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    manifest
        .first()
        .map(|entry| entry.logical_name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(fallback_database_name)
}

/// Full restore directive: every logical file is moved into `data_dir`.
pub fn build_restore_command(
    database_name: &str,
    backup_path: &str,
    manifest: &[FileManifestEntry],
    data_dir: &str,
) -> String {
    let data_dir = data_dir.trim_end_matches('/');
    let move_clause = manifest
        .iter()
        .map(|entry| {
            format!(
                "MOVE N'{}' TO N'{}/{}{}'",
                escape_literal(&entry.logical_name),
                escape_literal(data_dir),
                escape_literal(&entry.logical_name),
                entry.kind.extension()
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "RESTORE DATABASE [{}]\nFROM DISK = N'{}'\nWITH REPLACE,\nRECOVERY,\nSTATS = 10,\n{}",
        escape_identifier(database_name),
        escape_literal(backup_path),
        move_clause
    )
}

/// Degraded directive without file relocation; the engine picks file placement.
pub fn build_simple_restore_command(database_name: &str, backup_path: &str) -> String {
    format!(
        "RESTORE DATABASE [{}]\nFROM DISK = N'{}'\nWITH REPLACE, RECOVERY, STATS = 10",
        escape_identifier(database_name),
        escape_literal(backup_path)
    )
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn escape_identifier(value: &str) -> String {
    value.replace(']', "]]")
}
