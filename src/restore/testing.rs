// In-memory doubles shared by the unit tests of every module.
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::archive::ArchiveExtractor;
use crate::errors::{RestoreError, Result};
use crate::restore::db_restore::{FileKind, FileManifestEntry};
use crate::restore::progress::{ProgressReporter, ProgressStatus};
use crate::restore::session::{DatabaseSession, DatabaseState, SessionFactory};

#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub status: ProgressStatus,
    pub message: String,
    pub metadata: Value,
}

#[derive(Default, Clone)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of events whose metadata `step` equals `step`.
    pub fn steps(&self, step: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.metadata.get("step").and_then(Value::as_str) == Some(step))
            .count()
    }

    pub fn terminal_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| e.status != ProgressStatus::Processing)
            .count()
    }

    pub fn last(&self) -> Option<RecordedEvent> {
        self.events().last().cloned()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, status: ProgressStatus, message: &str, metadata: Value) {
        self.events.lock().unwrap().push(RecordedEvent {
            status,
            message: message.to_string(),
            metadata,
        });
    }
}

/// Scripted engine behaviour plus a log of what the code under test asked for.
#[derive(Debug, Default)]
pub struct FakeDatabase {
    pub manifest: Vec<FileManifestEntry>,
    pub connect_failures: u32,
    pub restore_failures: u32,
    pub fail_full_restore: bool,
    pub states: VecDeque<DatabaseState>,
    pub state_query_fails: bool,
    pub catalog_files: Vec<String>,

    pub connects: u32,
    pub manifest_reads: Vec<String>,
    pub executed: Vec<String>,
    pub state_polls: u32,
}

impl FakeDatabase {
    pub fn with_manifest(entries: &[(&str, FileKind)]) -> Self {
        Self {
            manifest: entries
                .iter()
                .map(|(name, kind)| FileManifestEntry::new(*name, *kind))
                .collect(),
            states: VecDeque::from(vec![DatabaseState::Online]),
            ..Default::default()
        }
    }

    pub fn states(mut self, states: &[DatabaseState]) -> Self {
        self.states = states.iter().cloned().collect();
        self
    }
}

#[derive(Clone)]
pub struct FakeSessionFactory {
    pub db: Arc<Mutex<FakeDatabase>>,
}

impl FakeSessionFactory {
    pub fn new(db: FakeDatabase) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&FakeDatabase) -> R) -> R {
        f(&self.db.lock().unwrap())
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn connect(&self) -> Result<Box<dyn DatabaseSession>> {
        let mut db = self.db.lock().unwrap();
        db.connects += 1;
        if db.connect_failures > 0 {
            db.connect_failures -= 1;
            return Err(RestoreError::Connection("connection refused".to_string()));
        }
        Ok(Box::new(FakeSession { db: self.db.clone() }))
    }
}

struct FakeSession {
    db: Arc<Mutex<FakeDatabase>>,
}

#[async_trait]
impl DatabaseSession for FakeSession {
    async fn file_list(&self, backup_path: &str) -> Result<Vec<FileManifestEntry>> {
        let mut db = self.db.lock().unwrap();
        db.manifest_reads.push(backup_path.to_string());
        Ok(db.manifest.clone())
    }

    async fn execute_restore(&self, command: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        db.executed.push(command.to_string());
        if db.restore_failures > 0 {
            db.restore_failures -= 1;
            return Err(RestoreError::Operation("restore interrupted".to_string()));
        }
        if db.fail_full_restore && command.contains("MOVE N'") {
            return Err(RestoreError::Operation(
                "Directory lookup for the file failed".to_string(),
            ));
        }
        Ok(())
    }

    async fn database_state(&self, _database: &str) -> Result<DatabaseState> {
        let mut db = self.db.lock().unwrap();
        db.state_polls += 1;
        if db.state_query_fails {
            return Err(RestoreError::Connection("connection reset by peer".to_string()));
        }
        let state = if db.states.len() > 1 {
            db.states.pop_front()
        } else {
            db.states.front().cloned()
        };
        Ok(state.unwrap_or(DatabaseState::NotFound))
    }

    async fn database_files(&self, _database: &str) -> Result<Vec<String>> {
        Ok(self.db.lock().unwrap().catalog_files.clone())
    }
}

/// Writes the given relative files into the output directory, or fails.
pub struct ScriptedExtractor {
    files: Vec<String>,
    failures: Mutex<u32>,
    pub calls: Mutex<u32>,
}

impl ScriptedExtractor {
    pub fn with_files(files: &[&str]) -> Self {
        Self {
            files: files.iter().map(|f| f.to_string()).collect(),
            failures: Mutex::new(0),
            calls: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            files: Vec::new(),
            failures: Mutex::new(u32::MAX),
            calls: Mutex::new(0),
        }
    }

    pub fn failing_times(mut self, times: u32) -> Self {
        self.failures = Mutex::new(times);
        self
    }
}

#[async_trait]
impl ArchiveExtractor for ScriptedExtractor {
    async fn extract(&self, _archive_path: &Path, output_dir: &Path) -> Result<()> {
        *self.calls.lock().unwrap() += 1;
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures = failures.saturating_sub(1);
                return Err(RestoreError::Extraction("bad archive header".to_string()));
            }
        }
        for file in &self.files {
            let path = output_dir.join(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, b"TAPE fake backup")?;
        }
        Ok(())
    }
}
