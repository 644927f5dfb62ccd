//! Reconnect backoff, busy-database retries and the per-account circuit
//! breaker.
//!
//! Everything that decides "try again, and when" lives here so the watcher,
//! the SMTP handler and the coordinator share one behaviour.

mod circuit;
mod retry;

pub use circuit::{CircuitBreaker, CircuitState, FailureReason};
pub use retry::RetryPolicy;
