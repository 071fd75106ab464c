// Single-command mode: one JSON request on stdin, newline-delimited JSON events on stdout.
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{error, info};

use crate::resolve::ResourceResolver;
use crate::restore::{JsonLineReporter, Orchestrator, ProgressStatus, RestoreOptions};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CommandRequest {
    pub command: String,
    pub resource: Option<String>,
    pub options: CommandOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CommandOptions {
    pub database_name: Option<String>,
    pub archive_processed: Option<bool>,
}

pub struct CommandHandler<W: Write + Send> {
    output: Arc<JsonLineReporter<W>>,
    resolver: ResourceResolver,
    orchestrator: Orchestrator,
    archive_processed_default: bool,
}

impl<W: Write + Send> CommandHandler<W> {
    /// `output` must be the reporter the orchestrator was built with, so that
    /// progress and the terminal event share one stream.
    pub fn new(
        output: Arc<JsonLineReporter<W>>,
        resolver: ResourceResolver,
        orchestrator: Orchestrator,
        archive_processed_default: bool,
    ) -> Self {
        Self {
            output,
            resolver,
            orchestrator,
            archive_processed_default,
        }
    }

    /// Reads the whole request from `input` and executes it. Ctrl+C while
    /// waiting or restoring ends the command with `INTERRUPTED`.
    pub async fn run<R: AsyncRead + Unpin>(&self, mut input: R) -> u8 {
        let execute = async {
            let mut raw = String::new();
            if let Err(e) = input.read_to_string(&mut raw).await {
                error!("Failed to read command from stdin: {}", e);
                self.fail(
                    &format!("Unhandled error: {}", e),
                    json!({ "code": "UNHANDLED_ERROR" }),
                );
                return EXIT_FAILURE;
            }
            self.handle(&raw).await
        };

        tokio::select! {
            code = execute => code,
            _ = interrupt() => {
                self.fail("Operation interrupted", json!({ "code": "INTERRUPTED" }));
                EXIT_INTERRUPTED
            }
        }
    }

    pub async fn handle(&self, raw: &str) -> u8 {
        let raw = raw.trim();
        if raw.is_empty() {
            self.fail("Empty command received on STDIN", json!({ "code": "EMPTY_COMMAND" }));
            return EXIT_FAILURE;
        }

        let request: CommandRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(e) => {
                info!("Rejecting malformed command: {}", e);
                self.fail("Invalid JSON command", json!({ "code": "INVALID_JSON" }));
                return EXIT_FAILURE;
            }
        };

        match request.command.to_lowercase().as_str() {
            "restore" => self.restore(request).await,
            other => {
                self.fail(
                    &format!("Unknown command: {}", other),
                    json!({ "code": "UNKNOWN_COMMAND" }),
                );
                EXIT_FAILURE
            }
        }
    }

    async fn restore(&self, request: CommandRequest) -> u8 {
        let Some(uri) = request
            .resource
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
        else {
            self.fail("Missing resource URI", json!({ "code": "MISSING_RESOURCE" }));
            return EXIT_FAILURE;
        };

        self.output.emit(
            "progress",
            ProgressStatus::Processing,
            &format!("Resolving resource: {}", uri),
            None,
        );
        let resolved = match self.resolver.resolve(&uri).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("Failed to resolve {}: {}", uri, e);
                self.fail(
                    &e.to_string(),
                    json!({
                        "code": e.code(),
                        "details": { "resource": uri, "error": e.to_string() },
                    }),
                );
                return EXIT_FAILURE;
            }
        };

        if resolved.is_download() {
            info!("Downloaded {} to {}", uri, resolved.path().display());
        }

        let options = RestoreOptions {
            database_name: request.options.database_name,
            archive_processed: request
                .options
                .archive_processed
                .unwrap_or(self.archive_processed_default),
            wait_for_stability: false,
            resource: Some(uri),
        };
        // The orchestrator emits the terminal result or error line.
        match self.orchestrator.process(resolved.path(), &options).await {
            Ok(_) => EXIT_SUCCESS,
            Err(_) => EXIT_FAILURE,
        }
    }

    fn fail(&self, message: &str, data: Value) {
        self.output
            .emit("error", ProgressStatus::Failed, message, Some(data));
    }
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed.
async fn interrupt() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::S3Settings;
    use crate::restore::progress::ProgressReporter;
    use crate::restore::db_restore::FileKind;
    use crate::restore::retry::RetryPolicy;
    use crate::restore::stability::StabilityDetector;
    use crate::restore::testing::{FakeDatabase, FakeSessionFactory, ScriptedExtractor};
    use crate::restore::RestoreSettings;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn events(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    fn handler(db: FakeDatabase) -> (CommandHandler<SharedBuffer>, SharedBuffer, FakeSessionFactory) {
        let buffer = SharedBuffer::default();
        let output = Arc::new(JsonLineReporter::new(buffer.clone()));
        let sessions = FakeSessionFactory::new(db);
        let settings = RestoreSettings {
            archive_extensions: vec![".rar".into()],
            backup_extensions: vec![".dat".into(), ".bak".into()],
            shared_dir: None,
            temp_dir: None,
            data_dir: "/var/opt/mssql/data".into(),
            retry: RetryPolicy::new(3, Duration::ZERO),
            stability: StabilityDetector::new(Duration::from_secs(1), Duration::ZERO),
            online_timeout: Duration::from_secs(5),
            online_interval: Duration::ZERO,
        };
        let reporter: Arc<dyn ProgressReporter> = output.clone();
        let orchestrator = Orchestrator::new(
            settings,
            Arc::new(sessions.clone()),
            Arc::new(ScriptedExtractor::with_files(&[])),
            reporter,
        );
        let resolver = ResourceResolver::new(S3Settings::default(), None).unwrap();
        (
            CommandHandler::new(output, resolver, orchestrator, true),
            buffer,
            sessions,
        )
    }

    fn terminal(events: &[Value]) -> Vec<&Value> {
        events.iter().filter(|e| e["type"] != "progress").collect()
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let cases = [
            ("", "EMPTY_COMMAND"),
            ("   \n", "EMPTY_COMMAND"),
            ("{not json", "INVALID_JSON"),
            (r#"{"command": "backup"}"#, "UNKNOWN_COMMAND"),
            (r#"{"command": "restore"}"#, "MISSING_RESOURCE"),
            (r#"{"command": "RESTORE", "resource": "  "}"#, "MISSING_RESOURCE"),
        ];
        for (input, code) in cases {
            let (handler, buffer, _) = handler(FakeDatabase::default());
            assert_eq!(handler.handle(input).await, EXIT_FAILURE, "input {:?}", input);

            let events = buffer.events();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0]["type"], "error");
            assert_eq!(events[0]["status"], "failed");
            assert_eq!(events[0]["data"]["code"], code);
        }
    }

    #[tokio::test]
    async fn test_restore_local_file_emits_one_result() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backup = dir.path().join("backup1.dat");
        std::fs::write(&backup, b"TAPE backup")?;
        let (handler, buffer, sessions) =
            handler(FakeDatabase::with_manifest(&[("MyDB", FileKind::Data)]));
        let request = json!({
            "command": "restore",
            "resource": format!("file://{}", backup.display()),
            "options": { "database_name": "Target", "archive_processed": false },
        });

        let code = handler.run(request.to_string().as_bytes()).await;

        assert_eq!(code, EXIT_SUCCESS);
        let events = buffer.events();
        assert_eq!(events[0]["type"], "progress");
        assert!(events[0].get("data").is_none());
        let terminal = terminal(&events);
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0]["type"], "result");
        assert_eq!(terminal[0]["status"], "success");
        assert_eq!(terminal[0]["message"], "Successfully restored database Target");
        assert_eq!(terminal[0]["data"]["database_name"], "Target");
        assert!(backup.exists());
        sessions.with(|db| assert_eq!(db.executed.len(), 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_resource_file_reports_not_found() {
        let (handler, buffer, sessions) =
            handler(FakeDatabase::with_manifest(&[("MyDB", FileKind::Data)]));
        let request = r#"{"command": "restore", "resource": "file:///tmp/definitely-missing-x.dat"}"#;

        assert_eq!(handler.handle(request).await, EXIT_FAILURE);

        let events = buffer.events();
        let terminal = terminal(&events);
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0]["type"], "error");
        assert_eq!(terminal[0]["data"]["code"], "NotFoundError");
        assert_eq!(
            terminal[0]["data"]["details"]["resource"],
            "file:///tmp/definitely-missing-x.dat"
        );
        sessions.with(|db| assert_eq!(db.connects, 0));
    }

    #[tokio::test]
    async fn test_restore_failure_is_reported_once() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backup = dir.path().join("garbage.bak");
        std::fs::write(&backup, b"TAPE?")?;
        let (handler, buffer, _) = handler(FakeDatabase::default());
        let request = json!({ "command": "restore", "resource": backup.display().to_string() });

        assert_eq!(handler.handle(&request.to_string()).await, EXIT_FAILURE);

        let events = buffer.events();
        let terminal = terminal(&events);
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0]["data"]["code"], "NoManifestError");
        assert_eq!(
            terminal[0]["data"]["details"]["resource"],
            backup.display().to_string()
        );
        Ok(())
    }
}
