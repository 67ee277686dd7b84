//! Retry envelope
//!
//! Every external step of a run (provisioning, duplicate search, mint,
//! channel operations) goes through one `RetryPolicy`. Failed attempts are
//! retried with exponential backoff; the whole step, backoff included, is
//! bounded by `step_timeout`.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Backoff and timeout settings for external steps.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    pub initial_interval: Duration,

    /// Growth factor between consecutive delays
    pub multiplier: f64,

    /// Cap for a single delay
    pub max_interval: Duration,

    /// Attempts including the first one
    pub max_attempts: u32,

    /// Bound for the whole step
    pub step_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(60),
            max_attempts: 3,
            step_timeout: Duration::from_secs(10 * 60), // 10 minutes
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `failed_attempt + 1`.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        Duration::from_secs_f64(secs)
    }

    /// Run `op` under this policy.
    ///
    /// Errors that `Error::is_retryable` rejects are returned unchanged on
    /// the first occurrence.
    pub async fn run<T, F, Fut>(&self, step: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match timeout(self.step_timeout, self.attempt_all(step, op)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(step, timeout = ?self.step_timeout, "Step timed out");
                Err(Error::Timeout {
                    step: step.to_string(),
                    duration: format!("{:?}", self.step_timeout),
                })
            }
        }
    }

    async fn attempt_all<T, F, Fut>(&self, step: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(step, attempt, "Step succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= max_attempts {
                return Err(Error::RetriesExhausted {
                    step: step.to_string(),
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            }

            let delay = self.backoff(attempt);
            warn!(step, attempt, error = %error, delay = ?delay, "Step failed, retrying");
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.step_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(7), Duration::from_secs(60));
        assert_eq!(policy.backoff(500), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast()
            .run("mint", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::mutation("mint_item", "busy"))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast()
            .run("mint", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::mutation("mint_item", "busy"))
            })
            .await;

        assert_matches!(
            result,
            Err(Error::RetriesExhausted { attempts: 3, ref last_error, .. })
                if matches!(**last_error, Error::LedgerMutation { .. })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast()
            .run("search", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Config("bad".into()))
            })
            .await;

        assert_matches!(result, Err(Error::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let policy = RetryPolicy {
            step_timeout: Duration::from_millis(20),
            ..fast()
        };
        let result: Result<()> = policy
            .run("slow", || async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_matches!(result, Err(Error::Timeout { step, .. }) if step == "slow");
    }
}
