// backupingest/src/restore/mssql.rs
use async_trait::async_trait;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::config::MssqlSettings;
use crate::errors::{RestoreError, Result};
use crate::restore::db_restore::{FileKind, FileManifestEntry};
use crate::restore::session::{DatabaseSession, DatabaseState, SessionFactory};

const FILE_LIST_SQL: &str = "RESTORE FILELISTONLY FROM DISK = @P1";
const STATE_SQL: &str = "SELECT state_desc FROM sys.databases WHERE name = @P1";
const FILES_SQL: &str = "SELECT name FROM sys.master_files WHERE database_id = DB_ID(@P1)";

/// Opens SQL Server sessions against `master`.
pub struct MssqlConnector {
    settings: MssqlSettings,
}

impl MssqlConnector {
    pub fn new(settings: MssqlSettings) -> Self {
        Self { settings }
    }

    fn client_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.settings.server);
        config.port(self.settings.port);
        config.database("master");
        config.authentication(AuthMethod::sql_server(
            &self.settings.user,
            &self.settings.password,
        ));
        if self.settings.trust_server_certificate {
            config.trust_cert();
        }
        config
    }
}

#[async_trait]
impl SessionFactory for MssqlConnector {
    async fn connect(&self) -> Result<Box<dyn DatabaseSession>> {
        let config = self.client_config();
        let target = format!("{}:{}", self.settings.server, self.settings.port);
        info!("Connecting to SQL Server at {}", target);

        let connect = async {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| RestoreError::Connection(format!("{}: {}", target, e)))?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| RestoreError::Connection(format!("{}: {}", target, e)))
        };

        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let client = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| {
                RestoreError::Connection(format!(
                    "{}: no response within {}s",
                    target, self.settings.timeout_secs
                ))
            })??;

        debug!("Connected to SQL Server at {}", target);
        Ok(Box::new(MssqlSession {
            client: Mutex::new(client),
        }))
    }
}

pub struct MssqlSession {
    client: Mutex<Client<Compat<TcpStream>>>,
}

fn query_error(action: &str, e: tiberius::error::Error) -> RestoreError {
    match e {
        tiberius::error::Error::Io { .. } | tiberius::error::Error::Tls(_) => {
            RestoreError::Connection(format!("{}: {}", action, e))
        }
        other => RestoreError::Operation(format!("{}: {}", action, other)),
    }
}

#[async_trait]
impl DatabaseSession for MssqlSession {
    async fn file_list(&self, backup_path: &str) -> Result<Vec<FileManifestEntry>> {
        let mut client = self.client.lock().await;
        let rows = client
            .query(FILE_LIST_SQL, &[&backup_path])
            .await
            .map_err(|e| query_error("RESTORE FILELISTONLY", e))?
            .into_first_result()
            .await
            .map_err(|e| query_error("RESTORE FILELISTONLY", e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let logical_name: Option<&str> = row
                .try_get("LogicalName")
                .map_err(|e| query_error("reading LogicalName", e))?;
            let type_code: Option<&str> = row
                .try_get("Type")
                .map_err(|e| query_error("reading Type", e))?;
            entries.push(FileManifestEntry::new(
                logical_name.unwrap_or_default(),
                FileKind::from_type_code(type_code.unwrap_or_default()),
            ));
        }
        Ok(entries)
    }

    async fn execute_restore(&self, command: &str) -> Result<()> {
        let mut client = self.client.lock().await;
        // RESTORE reports STATS progress as info messages; drain the stream so
        // errors raised late in the operation surface here.
        client
            .simple_query(command)
            .await
            .map_err(|e| query_error("RESTORE DATABASE", e))?
            .into_results()
            .await
            .map_err(|e| query_error("RESTORE DATABASE", e))?;
        Ok(())
    }

    async fn database_state(&self, database: &str) -> Result<DatabaseState> {
        let mut client = self.client.lock().await;
        let row = client
            .query(STATE_SQL, &[&database])
            .await
            .map_err(|e| query_error("reading database state", e))?
            .into_row()
            .await
            .map_err(|e| query_error("reading database state", e))?;

        match row {
            None => Ok(DatabaseState::NotFound),
            Some(row) => {
                let state: Option<&str> = row
                    .try_get("state_desc")
                    .map_err(|e| query_error("reading state_desc", e))?;
                Ok(DatabaseState::from_state_desc(state))
            }
        }
    }

    async fn database_files(&self, database: &str) -> Result<Vec<String>> {
        let mut client = self.client.lock().await;
        let rows = client
            .query(FILES_SQL, &[&database])
            .await
            .map_err(|e| query_error("reading database files", e))?
            .into_first_result()
            .await
            .map_err(|e| query_error("reading database files", e))?;

        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            let name: Option<&str> = row
                .try_get("name")
                .map_err(|e| query_error("reading file name", e))?;
            if let Some(name) = name {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}
