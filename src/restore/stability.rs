// backupingest/src/restore/stability.rs
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Decides when an in-progress copy has finished by watching the file size.
#[derive(Debug, Clone, Copy)]
pub struct StabilityDetector {
    pub timeout: Duration,
    pub interval: Duration,
}

impl StabilityDetector {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// True once two consecutive size samples match; false on timeout or when
    /// the file becomes inaccessible.
    pub async fn await_stable(&self, path: &Path) -> bool {
        let stable = self
            .await_stable_with(|| std::fs::metadata(path).map(|m| m.len()))
            .await;
        if stable {
            info!("File {} size has stabilized", path.display());
        } else {
            warn!("File {} did not stabilize, will be processed later", path.display());
        }
        stable
    }

    pub(crate) async fn await_stable_with<F>(&self, mut sample: F) -> bool
    where
        F: FnMut() -> io::Result<u64>,
    {
        let started = Instant::now();
        let mut last_size = match sample() {
            Ok(size) => size,
            Err(e) => {
                warn!("Error checking file size: {}", e);
                return false;
            }
        };

        while started.elapsed() < self.timeout {
            tokio::time::sleep(self.interval).await;
            match sample() {
                Ok(size) if size == last_size => return true,
                Ok(size) => {
                    info!("File size changed: {} → {} bytes", last_size, size);
                    last_size = size;
                }
                Err(e) => {
                    warn!("Error checking file size: {}", e);
                    return false;
                }
            }
        }
        false
    }
}
