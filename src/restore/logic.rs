// backupingest/src/restore/logic.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::archive::{self, ArchiveExtractor};
use crate::config::AppConfig;
use crate::errors::{RestoreError, Result};
use crate::restore::archival::archive_processed_file;
use crate::restore::db_restore::{
    FileManifestEntry, build_restore_command, build_simple_restore_command, derive_database_name,
    fallback_database_name, read_manifest,
};
use crate::restore::progress::{ProgressReporter, ProgressStatus};
use crate::restore::retry::RetryPolicy;
use crate::restore::session::{DatabaseSession, DatabaseState, SessionFactory};
use crate::restore::stability::StabilityDetector;
use crate::utils::{file_name_lossy, matching_extension};

const BACKUP_SIGNATURES: [&[u8]; 3] = [b"TAPE", b"SQLBAK", b"MSSQL"];
const HEADER_PROBE_BYTES: usize = 1024;

/// Everything the orchestrator needs from the application configuration.
#[derive(Debug, Clone)]
pub struct RestoreSettings {
    pub archive_extensions: Vec<String>,
    pub backup_extensions: Vec<String>,
    pub shared_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub data_dir: String,
    pub retry: RetryPolicy,
    pub stability: StabilityDetector,
    pub online_timeout: Duration,
    pub online_interval: Duration,
}

impl RestoreSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let backup = &config.backup;
        Self {
            archive_extensions: backup.archive_extensions.clone(),
            backup_extensions: backup.backup_extensions.clone(),
            shared_dir: backup.shared_dir.clone(),
            temp_dir: config.temp_dir.clone(),
            data_dir: config.mssql.data_dir.clone(),
            retry: config.retry_policy(),
            stability: StabilityDetector::new(
                Duration::from_secs(backup.stability_timeout_secs),
                Duration::from_secs(backup.stability_interval_secs),
            ),
            online_timeout: Duration::from_secs(backup.online_timeout_secs),
            online_interval: Duration::from_secs(backup.online_check_interval_secs),
        }
    }
}

/// Per-run knobs supplied by the caller (monitor or command handler).
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub database_name: Option<String>,
    pub archive_processed: bool,
    pub wait_for_stability: bool,
    /// What the caller asked for (a URI in command mode), echoed in error details.
    pub resource: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Archive,
    Backup,
}

/// An artifact under consideration, classified by its extension.
#[derive(Debug, Clone, Serialize)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub extension: String,
    pub kind: ArtifactKind,
    pub size: u64,
    pub detected_at: DateTime<Utc>,
}

impl BackupArtifact {
    pub fn detect(path: &Path, settings: &RestoreSettings) -> Result<Self> {
        let name = file_name_lossy(path);
        let (kind, extension) =
            if let Some(ext) = matching_extension(&name, &settings.archive_extensions) {
                (ArtifactKind::Archive, ext)
            } else if let Some(ext) = matching_extension(&name, &settings.backup_extensions) {
                (ArtifactKind::Backup, ext)
            } else {
                return Err(RestoreError::UnsupportedFileType(path.display().to_string()));
            };

        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RestoreError::NotFound(path.display().to_string()),
            _ => RestoreError::Io(e),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            extension: extension.to_string(),
            kind,
            size: metadata.len(),
            detected_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreResult {
    pub database_name: String,
    pub files_restored: Vec<String>,
    pub original_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_path: Option<String>,
}

/// Outcome of the restore stage before the database is confirmed online.
struct IssuedRestore {
    database_name: String,
    used_fallback: bool,
}

/// Copy of a backup placed where the database server can read it; removed on drop.
struct StagedBackup {
    path: PathBuf,
    owned: bool,
}

impl StagedBackup {
    async fn stage(source: &Path, shared_dir: Option<&Path>) -> Result<Self> {
        let Some(shared_dir) = shared_dir else {
            return Ok(Self {
                path: source.to_path_buf(),
                owned: false,
            });
        };
        if source.parent() == Some(shared_dir) {
            return Ok(Self {
                path: source.to_path_buf(),
                owned: false,
            });
        }

        tokio::fs::create_dir_all(shared_dir).await?;
        let target = shared_dir.join(file_name_lossy(source));
        info!("Copying backup file to shared location {}", target.display());
        if let Err(e) = tokio::fs::copy(source, &target).await {
            if let Err(cleanup) = tokio::fs::remove_file(&target).await {
                debug!("No partial copy to remove at {}: {}", target.display(), cleanup);
            }
            return Err(e.into());
        }
        Ok(Self {
            path: target,
            owned: true,
        })
    }

    fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

impl Drop for StagedBackup {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staged backup {}", self.path.display()),
            Err(e) => warn!("Failed to remove staged backup {}: {}", self.path.display(), e),
        }
    }
}

/// Drives one artifact from detection to an online database.
pub struct Orchestrator {
    settings: RestoreSettings,
    sessions: Arc<dyn SessionFactory>,
    extractor: Arc<dyn ArchiveExtractor>,
    reporter: Arc<dyn ProgressReporter>,
}

impl Orchestrator {
    pub fn new(
        settings: RestoreSettings,
        sessions: Arc<dyn SessionFactory>,
        extractor: Arc<dyn ArchiveExtractor>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            settings,
            sessions,
            extractor,
            reporter,
        }
    }

    /// Processes one artifact. The reporter receives exactly one terminal
    /// event (`Success` or `Failed`) per call.
    pub async fn process(&self, path: &Path, options: &RestoreOptions) -> Result<RestoreResult> {
        let run_id = Uuid::new_v4();
        let span = info_span!("restore", run_id = %run_id, artifact = %file_name_lossy(path));
        let outcome = self.run(path, options).instrument(span).await;

        match &outcome {
            Ok(result) => self.reporter.report(
                ProgressStatus::Success,
                &format!("Successfully restored database {}", result.database_name),
                serde_json::to_value(result).unwrap_or(Value::Null),
            ),
            Err(e) => {
                let resource = options
                    .resource
                    .clone()
                    .unwrap_or_else(|| path.display().to_string());
                self.reporter.report(
                    ProgressStatus::Failed,
                    &e.to_string(),
                    json!({
                        "code": e.code(),
                        "details": {
                            "resource": resource,
                            "error": e.to_string(),
                        },
                    }),
                );
            }
        }
        outcome
    }

    fn progress(&self, step: &str, message: &str, extra: Value) {
        let mut metadata = json!({ "step": step });
        if let (Some(target), Value::Object(extra)) = (metadata.as_object_mut(), extra) {
            target.extend(extra);
        }
        self.reporter
            .report(ProgressStatus::Processing, message, metadata);
    }

    async fn run(&self, path: &Path, options: &RestoreOptions) -> Result<RestoreResult> {
        if !path.exists() {
            return Err(RestoreError::NotFound(path.display().to_string()));
        }

        if options.wait_for_stability {
            self.progress(
                "stabilizing",
                &format!("Waiting for {} to finish writing", file_name_lossy(path)),
                json!({}),
            );
            if !self.settings.stability.await_stable(path).await {
                return Err(RestoreError::Unstable(path.display().to_string()));
            }
        }

        let artifact = BackupArtifact::detect(path, &self.settings)?;
        info!(
            "Processing {} ({:?}, {} bytes)",
            artifact.path.display(),
            artifact.kind,
            artifact.size
        );
        self.progress(
            "detected",
            &format!("Processing {}", file_name_lossy(path)),
            serde_json::to_value(&artifact).unwrap_or(Value::Null),
        );

        let restored = match artifact.kind {
            ArtifactKind::Archive => self.restore_from_archive(&artifact, options).await?,
            ArtifactKind::Backup => self.restore_backup(&artifact.path, options).await?,
        };

        let archived_path = if options.archive_processed {
            self.archive_original(&artifact.path)
        } else {
            None
        };

        Ok(RestoreResult {
            database_name: restored.0,
            files_restored: restored.1,
            original_file: artifact.path.display().to_string(),
            archived_path,
        })
    }

    async fn restore_from_archive(
        &self,
        artifact: &BackupArtifact,
        options: &RestoreOptions,
    ) -> Result<(String, Vec<String>)> {
        self.progress(
            "extracting",
            &format!("Extracting archive {}", file_name_lossy(&artifact.path)),
            json!({}),
        );

        let extractor = self.extractor.as_ref();
        let archive_path = artifact.path.as_path();
        let temp_root = self.settings.temp_dir.as_deref();
        let temp_dir = self
            .settings
            .retry
            .run("extract", self.reporter.as_ref(), move || {
                archive::extract_to_temp(extractor, archive_path, temp_root)
            })
            .await?;

        let candidates = archive::find_candidates(temp_dir.path(), &self.settings.backup_extensions)?;
        let Some(candidate) = candidates.first() else {
            return Err(RestoreError::NoBackupInArchive(
                artifact.path.display().to_string(),
            ));
        };
        if candidates.len() > 1 {
            warn!(
                "Archive contains {} backup files, only {} will be restored",
                candidates.len(),
                candidate.display()
            );
        }
        self.progress(
            "extracted",
            &format!("Found backup file {}", file_name_lossy(candidate)),
            json!({ "candidates": candidates.len() }),
        );

        let restored = self.restore_backup(candidate, options).await;
        if let Err(e) = temp_dir.close() {
            warn!("Failed to remove extraction directory: {}", e);
        }
        restored
    }

    async fn restore_backup(
        &self,
        backup_path: &Path,
        options: &RestoreOptions,
    ) -> Result<(String, Vec<String>)> {
        self.validate_backup_file(backup_path)?;

        let staged = StagedBackup::stage(backup_path, self.settings.shared_dir.as_deref()).await?;
        let staged_path = staged.path_str();
        let reporter = self.reporter.as_ref();
        let retry = self.settings.retry;

        self.progress("connecting", "Connecting to database server", json!({}));
        let sessions = self.sessions.as_ref();
        let session = retry.run("connect", reporter, move || sessions.connect()).await?;
        let session = session.as_ref();

        self.progress(
            "reading_manifest",
            "Reading backup file information",
            json!({ "backup_path": staged_path }),
        );
        let backup = staged_path.as_str();
        let manifest = retry
            .run("read manifest", reporter, move || read_manifest(session, backup))
            .await?;

        let database_name = derive_database_name(&manifest, options.database_name.as_deref());
        self.progress(
            "restoring",
            &format!("Restoring database {}", database_name),
            json!({ "database_name": database_name, "files": manifest.len() }),
        );
        let target = database_name.as_str();
        let entries = manifest.as_slice();
        let issued = retry
            .run("restore", reporter, move || {
                self.issue_restore(session, target, backup, entries)
            })
            .await?;

        self.wait_until_online(session, &issued.database_name).await?;

        let files = if issued.used_fallback {
            self.catalog_files(session, &issued.database_name, &manifest).await
        } else {
            manifest.iter().map(|e| e.logical_name.clone()).collect()
        };

        info!("Database {} restored successfully", issued.database_name);
        drop(staged);
        Ok((issued.database_name, files))
    }

    /// Full restore with file relocation; on an engine error, one attempt
    /// without relocation under a generated name.
    async fn issue_restore(
        &self,
        session: &dyn DatabaseSession,
        database_name: &str,
        backup_path: &str,
        manifest: &[FileManifestEntry],
    ) -> Result<IssuedRestore> {
        let command =
            build_restore_command(database_name, backup_path, manifest, &self.settings.data_dir);
        debug!("Executing restore command:\n{}", command);

        let error = match session.execute_restore(&command).await {
            Ok(()) => {
                return Ok(IssuedRestore {
                    database_name: database_name.to_string(),
                    used_fallback: false,
                });
            }
            Err(e) => e,
        };

        let fallback_name = fallback_database_name();
        warn!(
            "Restore of {} failed ({}), retrying without file relocation as {}",
            database_name, error, fallback_name
        );
        self.progress(
            "restore_fallback",
            &format!("Retrying restore as {}", fallback_name),
            json!({ "database_name": fallback_name, "error": error.to_string() }),
        );
        session
            .execute_restore(&build_simple_restore_command(&fallback_name, backup_path))
            .await?;
        Ok(IssuedRestore {
            database_name: fallback_name,
            used_fallback: true,
        })
    }

    async fn wait_until_online(&self, session: &dyn DatabaseSession, database: &str) -> Result<()> {
        info!("Waiting for database {} to come online", database);
        let started = Instant::now();
        let mut last_state: Option<DatabaseState> = None;

        loop {
            match session.database_state(database).await {
                Ok(DatabaseState::Online) => {
                    self.progress(
                        "online",
                        &format!("Database {} is online", database),
                        json!({ "elapsed_secs": started.elapsed().as_secs() }),
                    );
                    return Ok(());
                }
                Ok(state) => {
                    if last_state.as_ref() != Some(&state) {
                        info!("Database {} state: {}", database, state.label());
                        self.progress(
                            "state_change",
                            &format!("Database {} is {}", database, state.label()),
                            json!({
                                "state": state.label(),
                                "elapsed_secs": started.elapsed().as_secs(),
                            }),
                        );
                    }
                    if let DatabaseState::Unknown(other) = &state {
                        warn!("Unexpected state {} for database {}", other, database);
                    }
                    last_state = Some(state);
                }
                Err(e) => {
                    warn!("Error checking state of {}: {}", database, e);
                    return Err(e);
                }
            }

            if started.elapsed() >= self.settings.online_timeout {
                return Err(RestoreError::RestoreTimeout {
                    database: database.to_string(),
                    waited_secs: self.settings.online_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.settings.online_interval).await;
        }
    }

    async fn catalog_files(
        &self,
        session: &dyn DatabaseSession,
        database: &str,
        manifest: &[FileManifestEntry],
    ) -> Vec<String> {
        match session.database_files(database).await {
            Ok(files) if !files.is_empty() => files,
            Ok(_) => manifest.iter().map(|e| e.logical_name.clone()).collect(),
            Err(e) => {
                warn!("Could not read file catalog for {}: {}", database, e);
                manifest.iter().map(|e| e.logical_name.clone()).collect()
            }
        }
    }

    fn validate_backup_file(&self, path: &Path) -> Result<()> {
        let metadata = std::fs::metadata(path)
            .map_err(|_| RestoreError::NotFound(path.display().to_string()))?;
        if metadata.len() == 0 {
            return Err(RestoreError::InvalidInput(format!(
                "Backup file is empty: {}",
                path.display()
            )));
        }

        let mut header = Vec::with_capacity(HEADER_PROBE_BYTES);
        let probe = std::fs::File::open(path)
            .and_then(|file| file.take(HEADER_PROBE_BYTES as u64).read_to_end(&mut header));
        if let Err(e) = probe {
            warn!("Could not read header of {}: {}", path.display(), e);
            return Ok(());
        }
        let recognized = BACKUP_SIGNATURES
            .iter()
            .any(|sig| header.windows(sig.len()).any(|w| w == *sig));
        if !recognized {
            warn!("{} does not look like a SQL Server backup", path.display());
            self.progress(
                "validation_warning",
                &format!("{} has no SQL Server backup signature", file_name_lossy(path)),
                json!({ "path": path.display().to_string() }),
            );
        }
        Ok(())
    }

    /// Archival failures are logged; the restore already succeeded.
    fn archive_original(&self, path: &Path) -> Option<String> {
        match archive_processed_file(path) {
            Ok(archived) => {
                self.progress(
                    "archived",
                    &format!("Archived {}", file_name_lossy(path)),
                    json!({ "archived_path": archived.display().to_string() }),
                );
                Some(archived.display().to_string())
            }
            Err(e) => {
                warn!("Failed to archive {}: {}", path.display(), e);
                None
            }
        }
    }
}
