//! Per-account circuit breaker.
//!
//! The breaker keeps no state of its own. The failure count lives on the
//! worker heartbeat row and the trip is recorded on the account, so the
//! count survives worker restarts and an operator can inspect or reset it.

use std::fmt;

use tracing::{info, warn};

use crate::store::{AccountId, Store, WorkerStatus};
use crate::{Error, Result};

/// Why a connection or cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Credentials were rejected.
    AuthFailed,
    /// TLS handshake or certificate problem.
    TlsFailed,
    /// A bounded wait expired.
    Timeout,
    /// Anything else.
    Error,
}

impl FailureReason {
    /// Classifies an error by variant, then by its text.
    #[must_use]
    pub fn classify(error: &Error) -> Self {
        match error {
            Error::Imap(mailward_imap::Error::Auth(_)) => return Self::AuthFailed,
            Error::Imap(mailward_imap::Error::Tls(_) | mailward_imap::Error::InvalidDnsName(_)) => {
                return Self::TlsFailed;
            }
            e if e.is_timeout() => return Self::Timeout,
            _ => {}
        }

        let text = error.to_string().to_ascii_lowercase();
        if text.contains("auth") || text.contains("login") {
            Self::AuthFailed
        } else if text.contains("ssl") || text.contains("tls") {
            Self::TlsFailed
        } else if text.contains("timeout") || text.contains("timed out") {
            Self::Timeout
        } else {
            Self::Error
        }
    }

    /// Short form stored in `last_error`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthFailed => "auth_failed",
            Self::TlsFailed => "tls_failed",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Below the threshold; keep retrying.
    Closed {
        /// Consecutive failures so far.
        failures: i64,
    },
    /// Tripped; the account was deactivated.
    Open,
}

/// Trips an account after `threshold` consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreaker {
    threshold: u32,
}

impl CircuitBreaker {
    /// Breaker that opens at `threshold` failures (at least one).
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self { threshold: threshold.max(1) }
    }

    /// Counts a failure. At the threshold the account is set inactive with
    /// `last_error = "circuit_open:{reason}"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be updated.
    pub async fn record_failure(&self, store: &Store, account_id: AccountId, error: &Error) -> Result<CircuitState> {
        let reason = FailureReason::classify(error);
        let failures = store.heartbeat(&account_id.worker_id(), WorkerStatus::Error).await?;
        store
            .record_account_error(account_id, Some(&format!("{reason}: {error}")))
            .await?;

        if failures >= i64::from(self.threshold) {
            store.set_account_active(account_id, false).await?;
            store
                .record_account_error(account_id, Some(&format!("circuit_open:{reason}")))
                .await?;
            warn!(account_id = account_id.0, failures, %reason, "Circuit opened, account deactivated");
            return Ok(CircuitState::Open);
        }

        warn!(account_id = account_id.0, failures, %reason, error = %error, "Watcher failure");
        Ok(CircuitState::Closed { failures })
    }

    /// Resets the failure count after a healthy cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be updated.
    pub async fn record_success(&self, store: &Store, account_id: AccountId) -> Result<()> {
        store.heartbeat(&account_id.worker_id(), WorkerStatus::Active).await?;
        Ok(())
    }

    /// Operator reset: clears `last_error` and the failure count. The
    /// account stays inactive until re-enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be updated.
    pub async fn reset(store: &Store, account_id: AccountId) -> Result<()> {
        store.record_account_error(account_id, None).await?;
        store.reset_heartbeat(&account_id.worker_id()).await?;
        info!(account_id = account_id.0, "Circuit reset");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::NewAccount;

    #[test]
    fn test_classify() {
        let auth = Error::Imap(mailward_imap::Error::Auth("bad credentials".into()));
        assert_eq!(FailureReason::classify(&auth), FailureReason::AuthFailed);
        let no = Error::Imap(mailward_imap::Error::No("LOGIN failed".into()));
        assert_eq!(FailureReason::classify(&no), FailureReason::AuthFailed);
        let tls = Error::Config("TLS handshake failed".into());
        assert_eq!(FailureReason::classify(&tls), FailureReason::TlsFailed);
        let timeout = Error::Imap(mailward_imap::Error::Timeout(Duration::from_secs(15)));
        assert_eq!(FailureReason::classify(&timeout), FailureReason::Timeout);
        let other = Error::Io(std::io::Error::other("connection reset"));
        assert_eq!(FailureReason::classify(&other), FailureReason::Error);
    }

    #[tokio::test]
    async fn test_circuit_opens_at_threshold() {
        let store = Store::in_memory().await.unwrap();
        let id = store.insert_account(&NewAccount::with_email("a@x.example")).await.unwrap();
        let breaker = CircuitBreaker::new(3);
        let error = Error::Imap(mailward_imap::Error::Auth("rejected".into()));

        assert_eq!(
            breaker.record_failure(&store, id, &error).await.unwrap(),
            CircuitState::Closed { failures: 1 }
        );
        assert_eq!(
            breaker.record_failure(&store, id, &error).await.unwrap(),
            CircuitState::Closed { failures: 2 }
        );
        assert!(store.is_account_active(id).await.unwrap());

        assert_eq!(breaker.record_failure(&store, id, &error).await.unwrap(), CircuitState::Open);
        let account = store.get_account(id).await.unwrap().unwrap();
        assert!(!account.is_active);
        assert_eq!(account.last_error.as_deref(), Some("circuit_open:auth_failed"));
    }

    #[tokio::test]
    async fn test_success_and_reset_clear_failures() {
        let store = Store::in_memory().await.unwrap();
        let id = store.insert_account(&NewAccount::with_email("a@x.example")).await.unwrap();
        let breaker = CircuitBreaker::new(2);
        let error = Error::Timeout("connect".into());

        breaker.record_failure(&store, id, &error).await.unwrap();
        breaker.record_success(&store, id).await.unwrap();
        assert_eq!(
            breaker.record_failure(&store, id, &error).await.unwrap(),
            CircuitState::Closed { failures: 1 }
        );

        CircuitBreaker::reset(&store, id).await.unwrap();
        let heartbeat = store.get_heartbeat(&id.worker_id()).await.unwrap().unwrap();
        assert_eq!(heartbeat.error_count, 0);
        assert!(store.get_account(id).await.unwrap().unwrap().last_error.is_none());
    }
}
