mod logic;

pub use logic::{BackupMonitor, MonitorSettings};

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;

use crate::errors::Result;
use crate::restore::{Orchestrator, RestoreOptions, RestoreResult};

/// Base file names that were restored successfully during this process
/// lifetime. Failed files never enter the set.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    names: HashSet<String>,
}

impl ProcessedSet {
    pub fn contains(&self, file_name: &str) -> bool {
        self.names.contains(file_name)
    }

    pub fn insert(&mut self, file_name: impl Into<String>) -> bool {
        self.names.insert(file_name.into())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

/// What the monitor hands each new file to.
#[async_trait]
pub trait ArtifactProcessor: Send + Sync {
    async fn process_artifact(&self, path: &Path, options: &RestoreOptions) -> Result<RestoreResult>;
}

#[async_trait]
impl ArtifactProcessor for Orchestrator {
    async fn process_artifact(&self, path: &Path, options: &RestoreOptions) -> Result<RestoreResult> {
        self.process(path, options).await
    }
}
