//! Exponential backoff with jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::Result;
use crate::config::RetryConfig;

/// Backoff schedule for reconnects plus the bounded retry used for store
/// writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Delays are randomized within `±jitter_factor`.
    pub jitter_factor: f64,
    /// Attempts for a write that keeps hitting a busy database.
    pub store_write_attempts: u32,
    /// Fixed pause between those attempts.
    pub store_write_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Builds the policy from the `[retry]` section.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
            store_write_attempts: config.store_write_attempts.max(1),
            store_write_delay: Duration::from_millis(config.store_write_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    ///
    /// `min(base * 2^(attempt - 1), max) * (1 ± jitter)`
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        let exponent = attempt.saturating_sub(1);
        let delay = if exponent >= 63 {
            max
        } else {
            base.saturating_mul(1u64 << exponent).min(max)
        };

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let jittered = {
            let range = (delay as f64) * self.jitter_factor;
            if range > 0.0 {
                let jitter: f64 = rand::rng().random_range(-range..=range);
                ((delay as f64) + jitter).max(0.0) as u64
            } else {
                delay
            }
        };

        Duration::from_millis(jittered)
    }

    /// Runs `write`, retrying while it fails with a busy or locked
    /// database. Other errors and the last busy error are returned as-is.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn retry_store_write<T, F, Fut>(&self, mut write: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match write().await {
                Err(e) if e.is_busy() && attempt < self.store_write_attempts => {
                    debug!(attempt, error = %e, "Store busy, retrying write");
                    attempt += 1;
                    tokio::time::sleep(self.store_write_delay).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::Error;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy { jitter_factor: 0.0, ..RetryPolicy::default() }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = no_jitter();
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(2), Duration::from_secs(10));
        assert_eq!(policy.delay(3), Duration::from_secs(20));
        assert_eq!(policy.delay(4), Duration::from_secs(30));
        assert_eq!(policy.delay(100), Duration::from_secs(30));
        // Attempt 0 behaves like the first retry.
        assert_eq!(policy.delay(0), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_secs(4) && delay <= Duration::from_secs(6), "{delay:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_writes_are_retried() {
        let policy = RetryPolicy { store_write_attempts: 3, ..no_jitter() };
        let calls = AtomicU32::new(0);

        let result = policy
            .retry_store_write(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_attempts() {
        let policy = RetryPolicy { store_write_attempts: 2, ..no_jitter() };
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .retry_store_write(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Database(sqlx::Error::PoolTimedOut))
            })
            .await;
        assert!(result.unwrap_err().is_busy());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let policy = no_jitter();
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .retry_store_write(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::NotFound("row".into()))
            })
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
