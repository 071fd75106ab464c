//! SQL Server backup ingestion service
//!
//! Watches a directory for backup artifacts (or takes a single JSON command on
//! stdin) and restores them onto a SQL Server instance.

// backupingest/src/main.rs
mod archive;
mod cli;
mod config;
mod errors;
mod monitor;
mod resolve;
mod restore;
mod utils;

use anyhow::{Context, Result};
use serde_json::json;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use archive::ArchiveTool;
use cli::CommandHandler;
use config::AppConfig;
use monitor::{BackupMonitor, MonitorSettings};
use resolve::ResourceResolver;
use restore::progress::protocol_line;
use restore::{
    JsonLineReporter, LogReporter, MssqlConnector, Orchestrator, ProgressStatus, RestoreSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Monitor,
    Cli,
}

/// Main entry point: `backupingest [monitor|cli]`, or `TOOL_MODE`.
#[tokio::main]
async fn main() -> ExitCode {
    let mode = match select_mode(env::args().nth(1), env::var("TOOL_MODE").ok()) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            return ExitCode::FAILURE;
        }
    };

    match run_app(mode).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            if mode == Mode::Cli {
                // The caller only reads stdout; make sure it sees an error event.
                println!(
                    "{}",
                    protocol_line(
                        "error",
                        ProgressStatus::Failed,
                        &format!("Unhandled error: {:#}", e),
                        Some(json!({ "code": "UNHANDLED_ERROR" })),
                    )
                );
            }
            ExitCode::FAILURE
        }
    }
}

fn select_mode(arg: Option<String>, env_mode: Option<String>) -> Result<Mode> {
    let choice = arg
        .or(env_mode)
        .map(|m| m.trim().to_lowercase())
        .unwrap_or_else(|| "monitor".to_string());
    match choice.as_str() {
        "monitor" | "" => Ok(Mode::Monitor),
        "cli" => Ok(Mode::Cli),
        other => anyhow::bail!("Invalid mode '{}'. Use 'monitor' or 'cli'.", other),
    }
}

async fn run_app(mode: Mode) -> Result<u8> {
    let config = AppConfig::load(None).context("Failed to load application configuration")?;
    let _log_guard = utils::logger::init(&config.logging)?;
    ensure_directories(&config, mode)?;

    let sessions = Arc::new(MssqlConnector::new(config.mssql.clone()));
    let extractor = Arc::new(ArchiveTool::default());
    let settings = RestoreSettings::from_config(&config);

    match mode {
        Mode::Monitor => {
            info!("🚀 Starting backup monitor service");
            let orchestrator = Orchestrator::new(settings, sessions, extractor, Arc::new(LogReporter));
            let mut monitor =
                BackupMonitor::new(MonitorSettings::from_config(&config), Arc::new(orchestrator));

            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel.clone()));
            monitor.run(cancel).await.context("Backup monitor failed")?;
            Ok(cli::EXIT_SUCCESS)
        }
        Mode::Cli => {
            let output = Arc::new(JsonLineReporter::new(std::io::stdout()));
            let orchestrator = Orchestrator::new(settings, sessions, extractor, output.clone());
            let resolver = ResourceResolver::new(config.s3.clone(), config.temp_dir.clone())?;
            let handler = CommandHandler::new(
                output,
                resolver,
                orchestrator,
                config.backup.archive_processed,
            );
            Ok(handler.run(tokio::io::stdin()).await)
        }
    }
}

fn ensure_directories(config: &AppConfig, mode: Mode) -> Result<()> {
    let mut dirs = Vec::new();
    if mode == Mode::Monitor {
        dirs.push(&config.watch_dir);
    }
    dirs.extend(config.backup.shared_dir.iter());
    dirs.extend(config.temp_dir.iter());

    for dir in dirs {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

/// Cancels `cancel` on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, stopping after the current cycle"),
        _ = terminate => info!("Received SIGTERM, stopping after the current cycle"),
    }
    cancel.cancel();
}
