// backupingest/src/restore/session.rs
use async_trait::async_trait;

use crate::errors::Result;
use crate::restore::db_restore::FileManifestEntry;

/// Database state as reported by the server catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseState {
    Online,
    Restoring,
    Unknown(String),
    NotFound,
}

impl DatabaseState {
    pub fn from_state_desc(state: Option<&str>) -> Self {
        match state {
            None => DatabaseState::NotFound,
            Some(s) if s.eq_ignore_ascii_case("ONLINE") => DatabaseState::Online,
            Some(s) if s.eq_ignore_ascii_case("RESTORING") => DatabaseState::Restoring,
            Some(s) => DatabaseState::Unknown(s.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            DatabaseState::Online => "ONLINE",
            DatabaseState::Restoring => "RESTORING",
            DatabaseState::Unknown(s) => s.as_str(),
            DatabaseState::NotFound => "NOT_FOUND",
        }
    }
}

/// One open connection to the target engine, held for a whole restore run.
#[async_trait]
pub trait DatabaseSession: Send + Sync {
    /// Logical files described by the backup image at `backup_path`.
    async fn file_list(&self, backup_path: &str) -> Result<Vec<FileManifestEntry>>;

    async fn execute_restore(&self, command: &str) -> Result<()>;

    async fn database_state(&self, database: &str) -> Result<DatabaseState>;

    /// Physical file names of a database, read from the server catalog.
    async fn database_files(&self, database: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DatabaseSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_desc_mapping() {
        assert_eq!(DatabaseState::from_state_desc(Some("ONLINE")), DatabaseState::Online);
        assert_eq!(DatabaseState::from_state_desc(Some("RESTORING")), DatabaseState::Restoring);
        assert_eq!(DatabaseState::from_state_desc(None), DatabaseState::NotFound);
        assert_eq!(
            DatabaseState::from_state_desc(Some("RECOVERY_PENDING")),
            DatabaseState::Unknown("RECOVERY_PENDING".to_string())
        );
    }
}
