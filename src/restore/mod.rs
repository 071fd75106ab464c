pub(crate) mod archival;
pub(crate) mod db_restore;
pub(crate) mod logic;
pub(crate) mod mssql;
pub(crate) mod progress;
pub(crate) mod retry;
pub(crate) mod session;
pub(crate) mod stability;
#[cfg(test)]
pub(crate) mod testing;

pub use logic::{Orchestrator, RestoreOptions, RestoreResult, RestoreSettings};
pub use mssql::MssqlConnector;
pub use progress::{JsonLineReporter, LogReporter, ProgressStatus};
