//! [`Mailbox`] over `mailward-imap`.

use std::future::Future;
use std::time::Duration;

use mailward_imap::connection::{Client, IdleEvent, ImapStream, NotAuthenticated, Selected, connect};
use mailward_imap::{Capability, FetchAttribute, FetchItem, Flag, SearchCriteria, StoreAction, Uid, UidSet};
use mailward_mime::encoding::decode_rfc2047;
use tracing::debug;

use super::mailbox::{Connector, EnvelopeSummary, FetchedMessage, IdleOutcome, Mailbox, MailboxInfo};
use crate::store::Account;
use crate::{Error, Result};

/// Selected IMAP client type used by the watcher.
pub type SelectedClient = Client<ImapStream, Selected>;

/// Bound on commands other than connect and IDLE.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = mailward_imap::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::Timeout(format!("{what} after {}s", limit.as_secs()))),
    }
}

fn uid_set(uids: &[u32]) -> Option<UidSet> {
    let uids: Vec<Uid> = uids.iter().copied().filter_map(Uid::new).collect();
    UidSet::from_uids(&uids)
}

/// A logged-in session that always has a mailbox selected.
pub struct ImapMailbox {
    client: SelectedClient,
    capabilities: Vec<Capability>,
}

impl std::fmt::Debug for ImapMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMailbox").field("client", &self.client).finish_non_exhaustive()
    }
}

impl ImapMailbox {
    /// Connects, logs in and selects INBOX, all within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, login or SELECT fails or the
    /// timeout expires.
    pub async fn connect(account: &Account, timeout: Duration) -> Result<Self> {
        let imap = &account.imap;
        let login = async {
            let stream = connect(&imap.host, imap.port, imap.use_ssl).await?;
            let client: Client<ImapStream, NotAuthenticated> = Client::from_stream(stream).await?;
            let mut client = client.login(&imap.username, &imap.password).await?;
            client.capability().await?;
            client.select("INBOX").await
        };
        let (client, _status) = bounded(timeout, &format!("connect to {}:{}", imap.host, imap.port), login).await?;
        let capabilities = client.capabilities().to_vec();
        debug!(host = %imap.host, ?capabilities, "IMAP session ready");
        Ok(Self { client, capabilities })
    }
}

impl Mailbox for ImapMailbox {
    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }

    fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    async fn delimiter(&mut self) -> Result<Option<char>> {
        bounded(COMMAND_TIMEOUT, "LIST", self.client.delimiter()).await
    }

    async fn select(&mut self, folder: &str) -> Result<MailboxInfo> {
        let status = bounded(COMMAND_TIMEOUT, "SELECT", self.client.select(folder)).await?;
        Ok(MailboxInfo {
            uid_next: status.uid_next.map(Uid::get),
            exists: status.exists,
        })
    }

    async fn create(&mut self, folder: &str) -> Result<()> {
        bounded(COMMAND_TIMEOUT, "CREATE", self.client.create(folder)).await
    }

    async fn uid_search_all(&mut self) -> Result<Vec<u32>> {
        search(&mut self.client, SearchCriteria::All).await
    }

    async fn uid_search_unseen(&mut self) -> Result<Vec<u32>> {
        search(&mut self.client, SearchCriteria::Unseen).await
    }

    async fn uid_search_header(&mut self, name: &str, value: &str) -> Result<Vec<u32>> {
        search(&mut self.client, SearchCriteria::Header(name.to_string(), value.to_string())).await
    }

    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>> {
        let Some(set) = uid_set(uids) else {
            return Ok(Vec::new());
        };
        let attributes = vec![FetchAttribute::Uid, FetchAttribute::InternalDate, FetchAttribute::BodyPeek(None)];
        let responses = bounded(COMMAND_TIMEOUT, "UID FETCH", self.client.uid_fetch(&set, attributes)).await?;

        let mut messages = Vec::new();
        for (_seq, items) in responses {
            let mut uid = None;
            let mut raw = None;
            let mut internal_date = None;
            for item in items {
                match item {
                    FetchItem::Uid(u) => uid = Some(u.get()),
                    FetchItem::InternalDate(date) => internal_date = Some(date),
                    FetchItem::Body { section: None, data } => raw = data,
                    _ => {}
                }
            }
            if let (Some(uid), Some(raw)) = (uid, raw) {
                messages.push(FetchedMessage { uid, raw, internal_date });
            }
        }
        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    async fn fetch_envelopes(&mut self, uids: &[u32]) -> Result<Vec<EnvelopeSummary>> {
        let Some(set) = uid_set(uids) else {
            return Ok(Vec::new());
        };
        let attributes = vec![FetchAttribute::Uid, FetchAttribute::Envelope];
        let responses = bounded(COMMAND_TIMEOUT, "UID FETCH", self.client.uid_fetch(&set, attributes)).await?;

        let mut summaries = Vec::new();
        for (_seq, items) in responses {
            let mut summary = EnvelopeSummary::default();
            for item in items {
                match item {
                    FetchItem::Uid(u) => summary.uid = u.get(),
                    FetchItem::Envelope(envelope) => {
                        summary.subject = envelope.subject.as_deref().map(decode_rfc2047);
                        summary.sender = envelope.from.first().and_then(mailward_imap::Address::email);
                        summary.date = envelope.date.clone();
                    }
                    _ => {}
                }
            }
            if summary.uid != 0 {
                summaries.push(summary);
            }
        }
        summaries.sort_by_key(|s| s.uid);
        Ok(summaries)
    }

    async fn uid_move(&mut self, uids: &[u32], folder: &str) -> Result<()> {
        let Some(set) = uid_set(uids) else {
            return Ok(());
        };
        bounded(COMMAND_TIMEOUT, "UID MOVE", self.client.uid_move(&set, folder)).await
    }

    async fn uid_copy(&mut self, uids: &[u32], folder: &str) -> Result<()> {
        let Some(set) = uid_set(uids) else {
            return Ok(());
        };
        bounded(COMMAND_TIMEOUT, "UID COPY", self.client.uid_copy(&set, folder)).await
    }

    async fn uid_add_deleted(&mut self, uids: &[u32]) -> Result<()> {
        let Some(set) = uid_set(uids) else {
            return Ok(());
        };
        let action = StoreAction::Add(vec![Flag::Deleted]);
        bounded(COMMAND_TIMEOUT, "UID STORE", self.client.uid_store(&set, action)).await
    }

    async fn expunge(&mut self) -> Result<()> {
        bounded(COMMAND_TIMEOUT, "EXPUNGE", self.client.expunge()).await.map(drop)
    }

    async fn uid_expunge(&mut self, uids: &[u32]) -> Result<()> {
        let Some(set) = uid_set(uids) else {
            return Ok(());
        };
        bounded(COMMAND_TIMEOUT, "UID EXPUNGE", self.client.uid_expunge(&set)).await
    }

    async fn append(&mut self, folder: &str, flags: &[Flag], internal_date: Option<&str>, raw: &[u8]) -> Result<()> {
        bounded(COMMAND_TIMEOUT, "APPEND", self.client.append(folder, flags, internal_date, raw))
            .await
            .map(drop)
    }

    async fn noop(&mut self) -> Result<()> {
        bounded(COMMAND_TIMEOUT, "NOOP", self.client.noop()).await
    }

    async fn idle_wait(&mut self, timeout: Duration) -> Result<IdleOutcome> {
        if !self.capabilities.contains(&Capability::Idle) {
            return Ok(IdleOutcome::Unsupported);
        }
        let mut handle = bounded(COMMAND_TIMEOUT, "IDLE", self.client.idle()).await?;
        let waited = handle.wait(timeout).await;
        // DONE goes out even after a failed wait so the session is not left idling.
        let late = bounded(COMMAND_TIMEOUT, "DONE", handle.done()).await;
        let event = waited?;
        let late = late?;
        Ok(idle_outcome(event, &late))
    }

    async fn logout(self) -> Result<()> {
        bounded(COMMAND_TIMEOUT, "LOGOUT", self.client.logout()).await
    }
}

/// New mail if the awaited push or anything that raced `DONE` says so.
fn idle_outcome(event: IdleEvent, late: &[IdleEvent]) -> IdleOutcome {
    if event.is_new_mail() || late.iter().any(|e| e.is_new_mail()) {
        IdleOutcome::NewMail
    } else {
        IdleOutcome::Timeout
    }
}

async fn search(client: &mut SelectedClient, criteria: SearchCriteria) -> Result<Vec<u32>> {
    let mut uids: Vec<u32> = bounded(COMMAND_TIMEOUT, "UID SEARCH", client.uid_search(criteria))
        .await?
        .into_iter()
        .map(Uid::get)
        .collect();
    uids.sort_unstable();
    Ok(uids)
}

/// Builds [`ImapMailbox`] sessions.
#[derive(Debug, Clone, Copy)]
pub struct ImapConnector {
    connect_timeout: Duration,
}

impl ImapConnector {
    /// Connector whose connect plus login is bounded by `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for ImapConnector {
    type Mailbox = ImapMailbox;

    async fn connect(&self, account: &Account) -> Result<ImapMailbox> {
        ImapMailbox::connect(account, self.connect_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists_after_done_counts_as_new_mail() {
        assert_eq!(idle_outcome(IdleEvent::Timeout, &[]), IdleOutcome::Timeout);
        assert_eq!(idle_outcome(IdleEvent::Exists(4), &[]), IdleOutcome::NewMail);
        assert_eq!(idle_outcome(IdleEvent::Timeout, &[IdleEvent::Exists(5)]), IdleOutcome::NewMail);
        assert_eq!(idle_outcome(IdleEvent::Fetch(1), &[IdleEvent::Expunge(1)]), IdleOutcome::Timeout);
    }
}
