//! Fixed-delay retry for probe calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ProbeError;

/// Default number of attempts for rate-limited upstreams.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Retry a fallible call up to `attempts` times with a constant pause.
///
/// Only errors reporting [`ProbeError::is_retryable`] are retried; anything
/// else is returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for FixedRetry {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl FixedRetry {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Longest a full run can take when each attempt is capped at
    /// `per_attempt`.
    pub fn budget(&self, per_attempt: Duration) -> Duration {
        let attempts = self.attempts.max(1);
        per_attempt * attempts + self.delay * (attempts - 1)
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProbeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProbeError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!(
                        label,
                        attempt,
                        attempts,
                        error = %e,
                        "Probe attempt failed, retrying in {:?}",
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        warn!(label, attempt, error = %e, "Probe failed after retries");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = FixedRetry::default();

        let counter = calls.clone();
        let result = policy
            .run("test", || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(ProbeError::RateLimited(-412))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_bound() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = FixedRetry::new(3, Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        let counter = calls.clone();
        let result: Result<(), _> = policy
            .run("test", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProbeError::ProcessError("boom".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(ProbeError::ProcessError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two pauses between three attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_immediate() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = FixedRetry::default()
            .run("test", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProbeError::ApiError {
                        code: -400,
                        message: "bad request".into(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_budget_covers_every_attempt() {
        let policy = FixedRetry::new(3, Duration::from_secs(2));
        assert_eq!(policy.budget(Duration::from_secs(20)), Duration::from_secs(64));
        assert_eq!(FixedRetry::once().budget(Duration::from_secs(20)), Duration::from_secs(20));
    }

    #[test]
    fn test_attempts_never_zero() {
        assert_eq!(FixedRetry::new(0, Duration::ZERO).attempts, 1);
        assert_eq!(FixedRetry::once().attempts, 1);
    }
}
