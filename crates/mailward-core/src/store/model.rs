//! Records kept in the store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Heartbeat key of this account's watcher.
    #[must_use]
    pub fn worker_id(self) -> String {
        format!("imap_{}", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host, port and credentials of one server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Username for authentication.
    pub username: String,
    /// Password for authentication.
    pub password: String,
    /// Implicit TLS rather than plain TCP.
    pub use_ssl: bool,
}

/// A watched mailbox account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Row id.
    pub id: AccountId,
    /// Display name.
    pub account_name: String,
    /// Address mail is delivered to.
    pub email_address: String,
    /// IMAP server.
    pub imap: Endpoint,
    /// SMTP server.
    pub smtp: Endpoint,
    /// Cleared when the circuit breaker trips.
    pub is_active: bool,
    /// Preferred quarantine folder name.
    pub quarantine_folder: String,
    /// Last recorded failure, `circuit_open:{reason}` once tripped.
    pub last_error: Option<String>,
    /// End of the last completed detection cycle.
    pub last_checked: Option<DateTime<Utc>>,
}

/// Fields for inserting an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    /// Display name.
    pub account_name: String,
    /// Address mail is delivered to.
    pub email_address: String,
    /// IMAP server.
    pub imap: Endpoint,
    /// SMTP server.
    pub smtp: Endpoint,
    /// Watch this account.
    pub is_active: bool,
    /// Preferred quarantine folder name.
    pub quarantine_folder: String,
}

impl NewAccount {
    /// Active account with default quarantine folder and the given address
    /// as IMAP login.
    #[must_use]
    pub fn with_email(email: &str) -> Self {
        Self {
            account_name: email.to_string(),
            email_address: email.to_string(),
            imap: Endpoint { port: 993, username: email.to_string(), use_ssl: true, ..Endpoint::default() },
            smtp: Endpoint { port: 465, username: email.to_string(), use_ssl: true, ..Endpoint::default() },
            is_active: true,
            quarantine_folder: "Quarantine".to_string(),
        }
    }
}

/// Where a message is in the interception workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterceptionStatus {
    /// Seen and let through; terminal.
    Fetched,
    /// Matched a rule, not yet moved to quarantine.
    Intercepted,
    /// In quarantine awaiting review.
    Held,
    /// Re-delivered; terminal.
    Released,
    /// Rejected by a reviewer; terminal.
    Discarded,
}

impl InterceptionStatus {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FETCHED" => Some(Self::Fetched),
            "INTERCEPTED" => Some(Self::Intercepted),
            "HELD" => Some(Self::Held),
            "RELEASED" => Some(Self::Released),
            "DISCARDED" => Some(Self::Discarded),
            _ => None,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetched => "FETCHED",
            Self::Intercepted => "INTERCEPTED",
            Self::Held => "HELD",
            Self::Released => "RELEASED",
            Self::Discarded => "DISCARDED",
        }
    }

    /// True if `from → to` is an edge of the workflow. `None` is a row that
    /// does not exist yet.
    #[must_use]
    pub const fn can_transition(from: Option<Self>, to: Self) -> bool {
        matches!(
            (from, to),
            (None, Self::Fetched | Self::Intercepted | Self::Held)
                | (Some(Self::Intercepted), Self::Held)
                | (Some(Self::Held), Self::Released | Self::Discarded)
        )
    }

    /// No further transitions leave this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fetched | Self::Released | Self::Discarded)
    }
}

impl fmt::Display for InterceptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review status, kept alongside the interception status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// Awaiting review.
    #[default]
    Pending,
    /// Approved by a reviewer.
    Approved,
    /// Rejected by a reviewer.
    Rejected,
    /// Sent outbound.
    Sent,
    /// Delivered to the user's mailbox.
    Delivered,
}

impl MessageStatus {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "APPROVED" => Self::Approved,
            "REJECTED" => Self::Rejected,
            "SENT" => Self::Sent,
            "DELIVERED" => Self::Delivered,
            _ => Self::Pending,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
        }
    }
}

/// Which way the message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received.
    #[default]
    Inbound,
    /// Composed locally.
    Outbound,
}

impl Direction {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("outbound") { Self::Outbound } else { Self::Inbound }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// A stored message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Row id.
    pub id: i64,
    /// Owning account; `None` for SMTP mail to an unknown recipient.
    pub account_id: Option<AccountId>,
    /// `Message-ID` header or a generated stand-in.
    pub message_id: Option<String>,
    /// Inbound or outbound.
    pub direction: Direction,
    /// Workflow status; `None` only for legacy rows.
    pub interception_status: Option<InterceptionStatus>,
    /// Review status.
    pub status: MessageStatus,
    /// Envelope or `From` sender.
    pub sender: String,
    /// Recipients in header or RCPT order.
    pub recipients: Vec<String>,
    /// Decoded subject.
    pub subject: String,
    /// Plain text body.
    pub body_text: Option<String>,
    /// HTML body.
    pub body_html: Option<String>,
    /// Raw MIME kept inline.
    pub raw_content: Option<Vec<u8>>,
    /// Raw MIME kept in a file.
    pub raw_path: Option<String>,
    /// INBOX UID the message had when intercepted.
    pub original_uid: Option<u32>,
    /// IMAP `INTERNALDATE` of the original.
    pub original_internaldate: Option<String>,
    /// `Message-ID` of the original.
    pub original_message_id: Option<String>,
    /// `Message-ID` of the released copy when it differs.
    pub edited_message_id: Option<String>,
    /// Rule score, 0..=100.
    pub risk_score: u8,
    /// Terms that matched.
    pub keywords_matched: Vec<String>,
    /// Folder the message was moved to.
    pub quarantine_folder: Option<String>,
    /// Pending attachment edits, JSON.
    pub attachments_manifest: Option<String>,
    /// Bumped on each release.
    pub version: i64,
    /// Detection to quarantine, milliseconds.
    pub latency_ms: Option<i64>,
    /// Row creation.
    pub created_at: Option<DateTime<Utc>>,
    /// Last processing step.
    pub processed_at: Option<DateTime<Utc>>,
    /// Last reviewer or quarantine action.
    pub action_taken_at: Option<DateTime<Utc>>,
}

/// Fields for inserting a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMessage {
    /// Owning account.
    pub account_id: Option<AccountId>,
    /// `Message-ID`; duplicates are ignored on insert.
    pub message_id: Option<String>,
    /// Inbound or outbound.
    pub direction: Direction,
    /// Initial workflow status.
    pub interception_status: Option<InterceptionStatus>,
    /// Initial review status.
    pub status: MessageStatus,
    /// Sender.
    pub sender: String,
    /// Recipients.
    pub recipients: Vec<String>,
    /// Subject.
    pub subject: String,
    /// Plain text body.
    pub body_text: Option<String>,
    /// HTML body.
    pub body_html: Option<String>,
    /// Raw MIME kept inline.
    pub raw_content: Option<Vec<u8>>,
    /// Raw MIME kept in a file.
    pub raw_path: Option<String>,
    /// INBOX UID.
    pub original_uid: Option<u32>,
    /// IMAP `INTERNALDATE`.
    pub original_internaldate: Option<String>,
    /// Original `Message-ID`.
    pub original_message_id: Option<String>,
    /// Rule score.
    pub risk_score: u8,
    /// Terms that matched.
    pub keywords_matched: Vec<String>,
    /// Quarantine folder, when already known.
    pub quarantine_folder: Option<String>,
    /// Detection latency.
    pub latency_ms: Option<i64>,
}

/// Result of [`Store::insert_message`](super::Store::insert_message).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New row id.
    Inserted(i64),
    /// A row with the same `message_id` already exists.
    Duplicate,
}

/// Original (extracted) or staged (edit workflow) attachment rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Extracted from the received MIME.
    Original,
    /// Uploaded during an edit.
    Staged,
}

/// A stored attachment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Row id.
    pub id: i64,
    /// Owning message.
    pub email_id: i64,
    /// Sanitized filename.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub size: i64,
    /// Hex SHA-256 of the content.
    pub sha256: String,
    /// `attachment` or `inline`.
    pub disposition: String,
    /// `Content-ID` without brackets.
    pub content_id: Option<String>,
    /// Extracted from the original.
    pub is_original: bool,
    /// Staged during an edit.
    pub is_staged: bool,
    /// File on disk.
    pub storage_path: String,
}

impl Attachment {
    /// Inline disposition or referenced by `Content-ID`.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.disposition.eq_ignore_ascii_case("inline") || self.content_id.is_some()
    }
}

/// Fields for inserting an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    /// Owning message.
    pub email_id: i64,
    /// Sanitized filename.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// Size in bytes.
    pub size: i64,
    /// Hex SHA-256.
    pub sha256: String,
    /// `attachment` or `inline`.
    pub disposition: String,
    /// `Content-ID` without brackets.
    pub content_id: Option<String>,
    /// Original or staged.
    pub kind: AttachmentKind,
    /// File on disk.
    pub storage_path: String,
}

/// State of an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    /// Release running.
    Pending,
    /// Release finished; response stored.
    Success,
    /// Release failed; key may be reused.
    Failed,
}

impl IdempotencyStatus {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// A stored idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// Caller-supplied key.
    pub key: String,
    /// Message being released.
    pub email_id: i64,
    /// Outcome so far.
    pub status: IdempotencyStatus,
    /// Stored response for replay.
    pub response_json: Option<String>,
}

/// Watcher status published through heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Waiting in IDLE.
    Idle,
    /// Sleeping between polls.
    Polling,
    /// A cycle just succeeded.
    Active,
    /// A cycle or connection failed.
    Error,
    /// Worker exited.
    Stopped,
}

impl WorkerStatus {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "idle" => Self::Idle,
            "polling" => Self::Polling,
            "active" => Self::Active,
            "error" => Self::Error,
            _ => Self::Stopped,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Active => "active",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

/// Last heartbeat of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    /// `imap_{account_id}`.
    pub worker_id: String,
    /// When it was written.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Reported status.
    pub status: WorkerStatus,
    /// Consecutive errors.
    pub error_count: i64,
}
