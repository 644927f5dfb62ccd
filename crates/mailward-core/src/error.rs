//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IMAP operation failed.
    #[error("IMAP error: {0}")]
    Imap(#[from] mailward_imap::Error),

    /// MIME parsing or building failed.
    #[error("MIME error: {0}")]
    Mime(#[from] mailward_mime::Error),

    /// SMTP protocol failure.
    #[error("SMTP error: {0}")]
    Smtp(#[from] mailward_smtp::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A regular expression failed to compile.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration file could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bounded network wait expired.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A release step failed after the lock was taken, e.g. `raw-missing`
    /// or `verify-failed`.
    #[error("Release failed: {0}")]
    Release(String),

    /// The operation conflicts with the record's current state.
    #[error("Conflict: {reason}")]
    Conflict {
        /// Short machine-readable reason, e.g. `release-in-progress`.
        reason: String,
    },
}

impl Error {
    /// Shorthand for [`Error::Conflict`].
    #[must_use]
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict { reason: reason.into() }
    }

    /// True when SQLite reported the database as locked or busy, so the
    /// write is worth retrying.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        let Self::Database(err) = self else {
            return false;
        };
        match err {
            sqlx::Error::Database(db) => {
                // SQLITE_BUSY = 5, SQLITE_LOCKED = 6, plus extended codes.
                let code_busy = db
                    .code()
                    .and_then(|c| c.parse::<i64>().ok())
                    .is_some_and(|c| matches!(c & 0xff, 5 | 6));
                code_busy || message_is_busy(db.message())
            }
            sqlx::Error::PoolTimedOut => true,
            other => message_is_busy(&other.to_string()),
        }
    }

    /// True if the error came from a bounded wait expiring.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Imap(mailward_imap::Error::Timeout(_)))
    }
}

fn message_is_busy(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("database is locked") || lower.contains("busy") || lower.contains("locked")
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
