//! The IMAP session seam.
//!
//! The watcher and the release coordinator talk to a server only through
//! [`Mailbox`], so both can run against [`ImapMailbox`](super::ImapMailbox)
//! in production and an in-memory server in tests. UIDs are plain `u32`
//! here; zero never appears.

use std::future::Future;
use std::time::Duration;

use mailward_imap::{Capability, Flag};

use crate::Result;
use crate::store::Account;

/// What SELECT reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxInfo {
    /// `UIDNEXT`, if the server sent it.
    pub uid_next: Option<u32>,
    /// Number of messages.
    pub exists: u32,
}

/// A message fetched with `BODY.PEEK[]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Message UID.
    pub uid: u32,
    /// Full RFC 5322 bytes.
    pub raw: Vec<u8>,
    /// `INTERNALDATE` as sent by the server.
    pub internal_date: Option<String>,
}

/// Envelope fields shown by an inbox scan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvelopeSummary {
    /// Message UID.
    pub uid: u32,
    /// Decoded subject.
    pub subject: Option<String>,
    /// First From address.
    pub sender: Option<String>,
    /// Date header.
    pub date: Option<String>,
}

/// How an IDLE wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The server announced new messages.
    NewMail,
    /// Nothing new within the window.
    Timeout,
    /// The server does not do IDLE.
    Unsupported,
}

/// One logged-in IMAP session with a mailbox selected.
///
/// Every method is bounded by a timeout in the real implementation.
pub trait Mailbox: Send + Sync {
    /// Capabilities advertised after login.
    fn capabilities(&self) -> Vec<Capability>;

    /// True if the capability was advertised.
    fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities().contains(capability)
    }

    /// Hierarchy delimiter, if the server has one.
    fn delimiter(&mut self) -> impl Future<Output = Result<Option<char>>> + Send;

    /// Selects a folder.
    fn select(&mut self, folder: &str) -> impl Future<Output = Result<MailboxInfo>> + Send;

    /// Creates a folder.
    fn create(&mut self, folder: &str) -> impl Future<Output = Result<()>> + Send;

    /// `UID SEARCH ALL`, ascending.
    fn uid_search_all(&mut self) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// `UID SEARCH UNSEEN`, ascending.
    fn uid_search_unseen(&mut self) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// `UID SEARCH HEADER name value`, ascending.
    fn uid_search_header(&mut self, name: &str, value: &str) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// Full messages, ascending by UID. Missing UIDs are skipped.
    fn fetch(&mut self, uids: &[u32]) -> impl Future<Output = Result<Vec<FetchedMessage>>> + Send;

    /// Envelopes, ascending by UID.
    fn fetch_envelopes(&mut self, uids: &[u32]) -> impl Future<Output = Result<Vec<EnvelopeSummary>>> + Send;

    /// `UID MOVE` to `folder`.
    fn uid_move(&mut self, uids: &[u32], folder: &str) -> impl Future<Output = Result<()>> + Send;

    /// `UID COPY` to `folder`.
    fn uid_copy(&mut self, uids: &[u32], folder: &str) -> impl Future<Output = Result<()>> + Send;

    /// `UID STORE +FLAGS (\Deleted)`.
    fn uid_add_deleted(&mut self, uids: &[u32]) -> impl Future<Output = Result<()>> + Send;

    /// `EXPUNGE`.
    fn expunge(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// `UID EXPUNGE`.
    fn uid_expunge(&mut self, uids: &[u32]) -> impl Future<Output = Result<()>> + Send;

    /// `APPEND` to `folder`.
    fn append(
        &mut self,
        folder: &str,
        flags: &[Flag],
        internal_date: Option<&str>,
        raw: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;

    /// `NOOP` liveness check.
    fn noop(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Enters IDLE for at most `timeout`, then leaves it.
    fn idle_wait(&mut self, timeout: Duration) -> impl Future<Output = Result<IdleOutcome>> + Send;

    /// Ends the session.
    fn logout(self) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized;
}

/// Opens sessions for accounts.
pub trait Connector: Send + Sync + 'static {
    /// Session type produced.
    type Mailbox: Mailbox + 'static;

    /// Connects, logs in and selects INBOX.
    fn connect(&self, account: &Account) -> impl Future<Output = Result<Self::Mailbox>> + Send;
}

/// UIDs in the selected folder whose Message-ID matches, trying the id
/// stripped, bracketed and quoted.
///
/// # Errors
///
/// Returns the first failed search.
pub(crate) async fn find_by_message_id<M: Mailbox>(mailbox: &mut M, message_id: &str) -> Result<Vec<u32>> {
    let stripped = message_id.trim().trim_start_matches('<').trim_end_matches('>');
    if stripped.is_empty() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for query in [stripped.to_string(), format!("<{stripped}>"), format!("\"{stripped}\"")] {
        for uid in mailbox.uid_search_header("Message-ID", &query).await? {
            if !found.contains(&uid) {
                found.push(uid);
            }
        }
    }
    found.sort_unstable();
    Ok(found)
}
