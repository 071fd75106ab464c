use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported resource scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Failed to fetch resource: {0}")]
    Fetch(String),

    #[error("Archive extraction failed: {0}")]
    Extraction(String),

    #[error("No backup file found in archive: {0}")]
    NoBackupInArchive(String),

    #[error("No file information found in backup: {0}")]
    NoManifest(String),

    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Timeout waiting for database {database} to come online after {waited_secs}s")]
    RestoreTimeout { database: String, waited_secs: u64 },

    #[error("Restore operation failed: {0}")]
    Operation(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File is still being written: {0}")]
    Unstable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RestoreError {
    /// Stable identifier reported as the `code` of protocol error events.
    pub fn code(&self) -> &'static str {
        match self {
            RestoreError::NotFound(_) => "NotFoundError",
            RestoreError::UnsupportedScheme(_) => "UnsupportedSchemeError",
            RestoreError::Fetch(_) => "FetchError",
            RestoreError::Extraction(_) => "ExtractionError",
            RestoreError::NoBackupInArchive(_) => "NoBackupInArchiveError",
            RestoreError::NoManifest(_) => "NoManifestError",
            RestoreError::Connection(_) => "ConnectionError",
            RestoreError::RestoreTimeout { .. } => "RestoreTimeoutError",
            RestoreError::Operation(_) => "OperationError",
            RestoreError::UnsupportedFileType(_) => "UnsupportedFileTypeError",
            RestoreError::InvalidInput(_) => "InvalidInputError",
            RestoreError::Unstable(_) => "UnstableFileError",
            RestoreError::Io(_) => "IOError",
        }
    }

    /// Deterministic failures are not worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RestoreError::NotFound(_)
                | RestoreError::UnsupportedScheme(_)
                | RestoreError::NoBackupInArchive(_)
                | RestoreError::NoManifest(_)
                | RestoreError::RestoreTimeout { .. }
                | RestoreError::UnsupportedFileType(_)
                | RestoreError::InvalidInput(_)
                | RestoreError::Unstable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RestoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_protocol_names() {
        assert_eq!(RestoreError::NotFound("x".into()).code(), "NotFoundError");
        assert_eq!(RestoreError::NoManifest("x".into()).code(), "NoManifestError");
        let timeout = RestoreError::RestoreTimeout { database: "MyDB".into(), waited_secs: 300 };
        assert_eq!(timeout.code(), "RestoreTimeoutError");
        assert_eq!(
            timeout.to_string(),
            "Timeout waiting for database MyDB to come online after 300s"
        );
    }

    #[test]
    fn test_transient_failures_are_retryable() {
        assert!(RestoreError::Connection("refused".into()).is_retryable());
        assert!(RestoreError::Operation("deadlock".into()).is_retryable());
        assert!(RestoreError::Extraction("crc".into()).is_retryable());
        assert!(!RestoreError::NoManifest("empty".into()).is_retryable());
        assert!(!RestoreError::NotFound("gone".into()).is_retryable());
    }
}
