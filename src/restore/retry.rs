// backupingest/src/restore/retry.rs
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::RestoreError;
use crate::restore::progress::{ProgressReporter, ProgressStatus};

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Runs `operation` until it succeeds or `max_attempts` is reached.
    ///
    /// Every failed attempt that will be retried emits one `retry` event and
    /// running out of attempts emits one `retry_exhausted` event; both are
    /// informational. Errors that are not retryable are returned at once.
    pub async fn run<T, F, Fut>(
        &self,
        stage: &str,
        reporter: &dyn ProgressReporter,
        mut operation: F,
    ) -> Result<T, RestoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RestoreError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    warn!("All {} attempts failed for {}: {}", max_attempts, stage, e);
                    reporter.report(
                        ProgressStatus::Processing,
                        &format!("{} failed after {} attempts", stage, max_attempts),
                        json!({
                            "step": "retry_exhausted",
                            "stage": stage,
                            "attempts": attempt,
                            "error": e.to_string(),
                        }),
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!("Attempt {}/{} failed for {}: {}", attempt, max_attempts, stage, e);
                    reporter.report(
                        ProgressStatus::Processing,
                        &format!(
                            "{} failed (attempt {}/{}), retrying in {}s",
                            stage,
                            attempt,
                            max_attempts,
                            self.delay.as_secs()
                        ),
                        json!({
                            "step": "retry",
                            "stage": stage,
                            "attempt": attempt,
                            "max_attempts": max_attempts,
                            "error": e.to_string(),
                        }),
                    );
                    info!("Retrying {} in {:?}...", stage, self.delay);
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restore::testing::RecordingReporter;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_succeeds_after_two_failures() {
        let reporter = RecordingReporter::default();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = quick(3)
            .run("restore", &reporter, || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(RestoreError::Operation(format!("transient {}", n)))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(reporter.steps("retry"), 2);
        assert_eq!(reporter.steps("retry_exhausted"), 0);
    }

    #[tokio::test]
    async fn test_always_failing_propagates_last_error() {
        let reporter = RecordingReporter::default();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = quick(3)
            .run("extract", &reporter, || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err(RestoreError::Extraction(format!("attempt {}", n)))
            })
            .await;

        match result {
            Err(RestoreError::Extraction(msg)) => assert_eq!(msg, "attempt 3"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(reporter.steps("retry"), 2);
        assert_eq!(reporter.steps("retry_exhausted"), 1);
        assert_eq!(reporter.terminal_count(), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let reporter = RecordingReporter::default();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = quick(3)
            .run("read manifest", &reporter, || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RestoreError::NoManifest("empty".into()))
            })
            .await;

        assert!(matches!(result, Err(RestoreError::NoManifest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(reporter.events().is_empty());
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
