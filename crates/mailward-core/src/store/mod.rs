//! SQLite persistence.
//!
//! [`Store`] wraps one connection pool and is cheap to clone; every task
//! that needs the database holds its own clone. Operations are grouped by
//! table in the submodules.

mod accounts;
mod attachments;
mod heartbeats;
mod locks;
mod messages;
mod model;
mod rules;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use model::{
    Account, AccountId, Attachment, AttachmentKind, Direction, Endpoint, Heartbeat, IdempotencyRecord,
    IdempotencyStatus, InsertOutcome, InterceptionStatus, Message, MessageStatus, NewAccount, NewAttachment,
    NewMessage, WorkerStatus,
};

use crate::Result;

/// Repository over the Mailward database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new store with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Closes the pool, waiting for checked-out connections to come back.
    /// Later queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Creates every table and index.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS email_accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_name TEXT NOT NULL,
                email_address TEXT NOT NULL,
                imap_host TEXT NOT NULL,
                imap_port INTEGER NOT NULL,
                imap_username TEXT NOT NULL,
                imap_password TEXT NOT NULL,
                imap_use_ssl INTEGER NOT NULL DEFAULT 1,
                smtp_host TEXT NOT NULL,
                smtp_port INTEGER NOT NULL,
                smtp_username TEXT NOT NULL,
                smtp_password TEXT NOT NULL,
                smtp_use_ssl INTEGER NOT NULL DEFAULT 1,
                is_active INTEGER NOT NULL DEFAULT 1,
                quarantine_folder TEXT NOT NULL DEFAULT 'Quarantine',
                last_error TEXT,
                last_checked TEXT,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS moderation_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_name TEXT NOT NULL,
                rule_type TEXT NOT NULL,
                condition_field TEXT NOT NULL,
                condition_operator TEXT NOT NULL DEFAULT 'CONTAINS',
                condition_value TEXT NOT NULL,
                action TEXT NOT NULL DEFAULT 'HOLD',
                priority INTEGER NOT NULL DEFAULT 50,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS email_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER,
                message_id TEXT,
                direction TEXT NOT NULL DEFAULT 'inbound',
                interception_status TEXT,
                status TEXT NOT NULL DEFAULT 'PENDING',
                sender TEXT NOT NULL DEFAULT '',
                recipients TEXT NOT NULL DEFAULT '[]',
                subject TEXT NOT NULL DEFAULT '',
                body_text TEXT,
                body_html TEXT,
                raw_content BLOB,
                raw_path TEXT,
                original_uid INTEGER,
                original_internaldate TEXT,
                original_message_id TEXT,
                edited_message_id TEXT,
                risk_score INTEGER NOT NULL DEFAULT 0,
                keywords_matched TEXT NOT NULL DEFAULT '[]',
                quarantine_folder TEXT,
                attachments_manifest TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                latency_ms INTEGER,
                created_at TEXT NOT NULL,
                processed_at TEXT,
                action_taken_at TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_email_messages_message_id
            ON email_messages(message_id) WHERE message_id IS NOT NULL
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_email_messages_account_uid
            ON email_messages(account_id, original_uid)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_email_messages_interception
            ON email_messages(interception_status)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS email_attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id INTEGER NOT NULL,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                sha256 TEXT NOT NULL,
                disposition TEXT NOT NULL DEFAULT 'attachment',
                content_id TEXT,
                is_original INTEGER NOT NULL DEFAULT 0,
                is_staged INTEGER NOT NULL DEFAULT 0,
                storage_path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(email_id, filename, is_original, is_staged)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS email_release_locks (
                email_id INTEGER PRIMARY KEY,
                acquired_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS idempotency_keys (
                key TEXT PRIMARY KEY,
                email_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                response_json TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS worker_heartbeats (
                worker_id TEXT PRIMARY KEY,
                last_heartbeat TEXT NOT NULL,
                status TEXT NOT NULL,
                error_count INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Fixed-width RFC 3339 so stored timestamps compare as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now() -> String {
    timestamp(Utc::now())
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
