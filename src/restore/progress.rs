// backupingest/src/restore/progress.rs
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::io::Write;
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Processing,
    Success,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Processing => "processing",
            ProgressStatus::Success => "success",
            ProgressStatus::Failed => "failed",
        }
    }
}

/// Sink for milestone events emitted while a backup is restored.
///
/// `Success`/`Failed` are terminal and arrive exactly once per run; everything
/// else is informational.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, status: ProgressStatus, message: &str, metadata: Value);
}

/// Routes events into the tracing log, used by the monitor service.
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, status: ProgressStatus, message: &str, metadata: Value) {
        match status {
            ProgressStatus::Processing => info!(data = %metadata, "{}", message),
            ProgressStatus::Success => info!(data = %metadata, "✅ {}", message),
            ProgressStatus::Failed => error!(data = %metadata, "❌ {}", message),
        }
    }
}

/// Writes one JSON object per line: `progress` for informational events,
/// `result`/`error` for the terminal one.
pub struct JsonLineReporter<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLineReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn emit(&self, kind: &str, status: ProgressStatus, message: &str, data: Option<Value>) {
        let line = protocol_line(kind, status, message, data);
        let Ok(mut out) = self.out.lock() else {
            warn!("Output writer lock poisoned, dropping event: {}", message);
            return;
        };
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!("Failed to write protocol line: {}", e);
        }
    }
}

impl<W: Write + Send> ProgressReporter for JsonLineReporter<W> {
    fn report(&self, status: ProgressStatus, message: &str, metadata: Value) {
        let kind = match status {
            ProgressStatus::Processing => "progress",
            ProgressStatus::Success => "result",
            ProgressStatus::Failed => "error",
        };
        let data = match metadata {
            Value::Null => None,
            Value::Object(ref map) if map.is_empty() => None,
            other => Some(other),
        };
        self.emit(kind, status, message, data);
    }
}

pub fn protocol_line(kind: &str, status: ProgressStatus, message: &str, data: Option<Value>) -> String {
    let mut object = Map::new();
    object.insert("type".to_string(), json!(kind));
    object.insert(
        "timestamp".to_string(),
        json!(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
    );
    object.insert("status".to_string(), json!(status.as_str()));
    object.insert("message".to_string(), json!(message));
    if let Some(data) = data {
        object.insert("data".to_string(), data);
    }
    Value::Object(object).to_string()
}
