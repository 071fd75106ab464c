// backupingest/src/monitor/logic.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::errors::Result;
use crate::monitor::{ArtifactProcessor, ProcessedSet};
use crate::restore::RestoreOptions;
use crate::utils::{file_name_lossy, matching_extension};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub watch_dir: PathBuf,
    pub file_patterns: Vec<String>,
    pub transient_markers: Vec<String>,
    pub poll_interval: Duration,
    pub archive_processed: bool,
}

impl MonitorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            watch_dir: config.watch_dir.clone(),
            file_patterns: config.backup.file_patterns.clone(),
            transient_markers: config.backup.transient_markers.clone(),
            poll_interval: config.polling_interval(),
            archive_processed: config.backup.archive_processed,
        }
    }
}

/// Polls the watched directory and feeds new files, one at a time, to the
/// processor.
pub struct BackupMonitor {
    settings: MonitorSettings,
    processor: Arc<dyn ArtifactProcessor>,
    processed: ProcessedSet,
}

impl BackupMonitor {
    pub fn new(settings: MonitorSettings, processor: Arc<dyn ArtifactProcessor>) -> Self {
        Self {
            settings,
            processor,
            processed: ProcessedSet::default(),
        }
    }

    #[cfg(test)]
    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    /// Runs cycles until `cancel` fires. Cancellation is only observed between
    /// cycles; an in-flight restore always completes.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            "Starting backup monitor on {} (patterns: {:?}, interval: {:?})",
            self.settings.watch_dir.display(),
            self.settings.file_patterns,
            self.settings.poll_interval
        );
        self.log_inventory();

        while !cancel.is_cancelled() {
            if let Err(e) = self.run_cycle().await {
                error!("Error in monitoring loop: {}", e);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        info!(
            "Backup monitor stopped, {} files processed",
            self.processed.len()
        );
        Ok(())
    }

    /// Processes every new file once, in directory-listing order. Returns how
    /// many were restored.
    pub async fn run_cycle(&mut self) -> Result<usize> {
        let new_files = self.find_new_files()?;
        let options = RestoreOptions {
            database_name: None,
            archive_processed: self.settings.archive_processed,
            wait_for_stability: true,
            resource: None,
        };

        let mut restored = 0;
        for path in new_files {
            let name = file_name_lossy(&path);
            info!("New backup file detected: {}", path.display());
            match self.processor.process_artifact(&path, &options).await {
                Ok(result) => {
                    info!(
                        "Processed {} into database {}",
                        name, result.database_name
                    );
                    self.processed.insert(name);
                    restored += 1;
                }
                Err(e) => {
                    // Left out of the processed set so the next cycle retries it.
                    warn!("Failed to process {}: {}", name, e);
                }
            }
        }
        Ok(restored)
    }

    pub fn find_new_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.settings.watch_dir)? {
            let path = entry?.path();
            let name = file_name_lossy(&path);
            if self.processed.contains(&name) {
                continue;
            }
            if matching_extension(&name, &self.settings.file_patterns).is_none() {
                continue;
            }
            if self.is_transient(&name) {
                debug!("Skipping temporary file: {}", path.display());
                continue;
            }
            if !path.is_file() {
                continue;
            }
            files.push(path);
        }
        Ok(files)
    }

    fn is_transient(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.settings
            .transient_markers
            .iter()
            .any(|marker| lower.contains(&marker.to_lowercase()))
    }

    fn log_inventory(&self) {
        match self.find_new_files() {
            Ok(files) => info!(
                "Found {} existing backup files in {}",
                files.len(),
                self.settings.watch_dir.display()
            ),
            Err(e) => warn!(
                "Could not list {}: {}",
                self.settings.watch_dir.display(),
                e
            ),
        }
    }
}
