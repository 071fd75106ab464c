// backupingest/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::restore::retry::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MssqlSettings {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub timeout_secs: u64,
    /// Directory on the database server that receives restored data/log files.
    pub data_dir: String,
    pub trust_server_certificate: bool,
}

impl Default for MssqlSettings {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: 1433,
            user: "sa".to_string(),
            password: String::new(),
            timeout_secs: 60,
            data_dir: "/var/opt/mssql/data".to_string(),
            trust_server_certificate: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Directory visible to the database server; backups are staged here before restore.
    pub shared_dir: Option<PathBuf>,
    /// Extensions the monitor picks up from the watched directory.
    pub file_patterns: Vec<String>,
    pub archive_extensions: Vec<String>,
    pub backup_extensions: Vec<String>,
    pub transient_markers: Vec<String>,
    pub archive_processed: bool,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub stability_timeout_secs: u64,
    pub stability_interval_secs: u64,
    pub online_timeout_secs: u64,
    pub online_check_interval_secs: u64,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            shared_dir: Some(PathBuf::from("/shared_backup")),
            file_patterns: vec![".rar".to_string(), ".dat".to_string()],
            archive_extensions: [".rar", ".zip", ".7z", ".tar", ".tar.gz", ".tgz"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            backup_extensions: vec![".dat".to_string(), ".bak".to_string()],
            transient_markers: vec![".lock".to_string(), ".tmp".to_string(), ".part".to_string()],
            archive_processed: true,
            retry_attempts: 3,
            retry_delay_secs: 5,
            stability_timeout_secs: 60,
            stability_interval_secs: 2,
            online_timeout_secs: 300,
            online_check_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub directory: Option<PathBuf>,
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            json_format: false,
        }
    }
}

/// Settings value built once at startup and handed to every component.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub watch_dir: PathBuf,
    pub polling_interval_secs: f64,
    pub temp_dir: Option<PathBuf>,
    pub mssql: MssqlSettings,
    pub backup: BackupSettings,
    pub s3: S3Settings,
    pub logging: LoggingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("/data/backups"),
            polling_interval_secs: 1.0,
            temp_dir: None,
            mssql: MssqlSettings::default(),
            backup: BackupSettings::default(),
            s3: S3Settings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads `config.json` (when present), then applies environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let default_path = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let path = config_path.unwrap_or(&default_path);

        let mut config = if path.exists() {
            Self::load_from_json(path)?
        } else {
            AppConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BACKUP_WATCH_DIR") {
            self.watch_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("POLLING_INTERVAL") {
            self.polling_interval_secs = parse_env("POLLING_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("TOOL_TEMP_DIR") {
            self.temp_dir = non_empty(v).map(PathBuf::from);
        }

        if let Some(v) = lookup("MSSQL_SERVER") {
            self.mssql.server = v;
        }
        if let Some(v) = lookup("MSSQL_PORT") {
            self.mssql.port = parse_env("MSSQL_PORT", &v)?;
        }
        if let Some(v) = lookup("MSSQL_USER") {
            self.mssql.user = v;
        }
        if let Some(v) = lookup("MSSQL_PASSWORD") {
            self.mssql.password = v;
        }
        if let Some(v) = lookup("MSSQL_TIMEOUT") {
            self.mssql.timeout_secs = parse_env("MSSQL_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("MSSQL_DATA_DIR") {
            self.mssql.data_dir = v;
        }

        if let Some(v) = lookup("BACKUP_SHARED_DIR") {
            self.backup.shared_dir = non_empty(v).map(PathBuf::from);
        }
        if let Some(v) = lookup("BACKUP_FILE_PATTERNS") {
            self.backup.file_patterns = v
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = lookup("BACKUP_ARCHIVE_PROCESSED") {
            self.backup.archive_processed = parse_env("BACKUP_ARCHIVE_PROCESSED", &v)?;
        }
        if let Some(v) = lookup("BACKUP_RETRY_ATTEMPTS") {
            self.backup.retry_attempts = parse_env("BACKUP_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("BACKUP_RETRY_DELAY") {
            self.backup.retry_delay_secs = parse_env("BACKUP_RETRY_DELAY", &v)?;
        }

        if let Some(v) = lookup("S3_ENDPOINT_URL") {
            self.s3.endpoint_url = non_empty(v);
        }
        if let Some(v) = lookup("S3_REGION") {
            self.s3.region = non_empty(v);
        }
        if let Some(v) = lookup("S3_ACCESS_KEY_ID") {
            self.s3.access_key_id = non_empty(v);
        }
        if let Some(v) = lookup("S3_SECRET_ACCESS_KEY") {
            self.s3.secret_access_key = non_empty(v);
        }

        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) = lookup("LOG_DIRECTORY") {
            self.logging.directory = non_empty(v).map(PathBuf::from);
        }
        if let Some(v) = lookup("LOG_JSON_FORMAT") {
            self.logging.json_format = parse_env("LOG_JSON_FORMAT", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mssql.password.is_empty() {
            anyhow::bail!("MSSQL password must be set (mssql.password or MSSQL_PASSWORD)");
        }
        if self.backup.retry_attempts == 0 {
            anyhow::bail!("backup.retry_attempts must be at least 1");
        }
        if self.backup.file_patterns.is_empty() {
            anyhow::bail!("backup.file_patterns cannot be empty");
        }
        if !(self.polling_interval_secs.is_finite() && self.polling_interval_secs > 0.0) {
            anyhow::bail!("polling_interval_secs must be a positive finite number");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.backup.retry_attempts,
            Duration::from_secs(self.backup.retry_delay_secs),
        )
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.polling_interval_secs)
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("Invalid value for {}: {}", key, value))
}
