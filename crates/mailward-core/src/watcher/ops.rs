//! One-shot operations run outside the watcher loop.
//!
//! Each opens its own session and logs out when done, so they can run while
//! the account's watcher is active.

use chrono::Utc;
use tracing::info;

use super::cycle::{AccountSession, move_to_quarantine, new_inbound};
use super::mailbox::{Connector, EnvelopeSummary, Mailbox};
use super::worker::WatcherContext;
use crate::mail::ParsedMail;
use crate::rules::evaluate;
use crate::store::{Account, AccountId, InsertOutcome, InterceptionStatus, Store};
use crate::{Error, Result};

/// Default number of UIDs `scan_inbox` looks at.
pub const DEFAULT_SCAN_LIMIT: usize = 30;
/// Default number of UIDs `resync` moves.
pub const DEFAULT_RESYNC_LIMIT: usize = 50;

/// Result of [`resync`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Messages moved to quarantine.
    pub moved: usize,
    /// INBOX UIDs looked at.
    pub checked: usize,
}

/// Result of [`intercept_uid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualIntercept {
    /// Row now HELD.
    pub email_id: i64,
    /// Folder the message was moved to.
    pub folder: String,
    /// The row existed before this call.
    pub already_stored: bool,
}

async fn account(store: &Store, account_id: AccountId) -> Result<Account> {
    store
        .get_account(account_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("account {account_id}")))
}

fn last_n(uids: &[u32], limit: usize) -> &[u32] {
    &uids[uids.len().saturating_sub(limit)..]
}

/// The last `limit` INBOX messages the store has not seen, with envelope
/// fields.
///
/// # Errors
///
/// Returns an error if the account is unknown or IMAP fails.
pub async fn scan_inbox<C: Connector>(
    ctx: &WatcherContext<C>,
    account_id: AccountId,
    limit: usize,
) -> Result<Vec<EnvelopeSummary>> {
    let account = account(&ctx.store, account_id).await?;
    let mut mailbox = ctx.connector.connect(&account).await?;
    mailbox.select("INBOX").await?;

    let all = mailbox.uid_search_all().await?;
    let recent = last_n(&all, limit);
    let known = ctx.store.known_uids(account_id, recent).await?;
    let unknown: Vec<u32> = recent.iter().copied().filter(|uid| !known.contains(uid)).collect();
    let envelopes = if unknown.is_empty() { Vec::new() } else { mailbox.fetch_envelopes(&unknown).await? };

    mailbox.logout().await?;
    Ok(envelopes)
}

/// Moves the last `limit` INBOX messages into quarantine. Rows among them
/// that were INTERCEPTED become HELD.
///
/// # Errors
///
/// Returns an error if the account is unknown, IMAP fails or the move is
/// refused by every target.
pub async fn resync<C: Connector>(ctx: &WatcherContext<C>, account_id: AccountId, limit: usize) -> Result<ResyncReport> {
    let account = account(&ctx.store, account_id).await?;
    let mailbox = ctx.connector.connect(&account).await?;
    let mut session = AccountSession::open(mailbox, account, &ctx.store, &ctx.config).await?;

    let all = session.mailbox.uid_search_all().await?;
    let uids = last_n(&all, limit).to_vec();
    let mut report = ResyncReport { moved: 0, checked: uids.len() };
    if !uids.is_empty() {
        let folder =
            move_to_quarantine(&mut session.mailbox, &uids, &session.targets, ctx.config.force_copy_purge).await?;
        report.moved = uids.len();
        for (id, uid) in ctx.store.intercepted_uids(account_id).await? {
            if uids.contains(&uid) {
                ctx.store.mark_held(id, &folder, None).await?;
            }
        }
        info!(account_id = account_id.0, folder = %folder, moved = report.moved, "Resync moved messages");
    }

    session.mailbox.logout().await?;
    Ok(report)
}

/// Fetches one INBOX UID, moves it to quarantine and records it as HELD.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the UID is not in INBOX and
/// [`Error::Conflict`] if the message is stored in a state that cannot be
/// held.
pub async fn intercept_uid<C: Connector>(
    ctx: &WatcherContext<C>,
    account_id: AccountId,
    uid: u32,
) -> Result<ManualIntercept> {
    let account = account(&ctx.store, account_id).await?;
    let mailbox = ctx.connector.connect(&account).await?;
    let mut session = AccountSession::open(mailbox, account, &ctx.store, &ctx.config).await?;

    let Some(message) = session.mailbox.fetch(&[uid]).await?.into_iter().next() else {
        session.mailbox.logout().await?;
        return Err(Error::NotFound(format!("UID {uid} in INBOX")));
    };
    let parsed = ParsedMail::parse(&message.raw);
    let evaluation = evaluate(&parsed.fields(), &ctx.store.active_rules().await?);
    let new = new_inbound(account_id, &parsed, &evaluation, InterceptionStatus::Intercepted, message);

    let (email_id, already_stored) = match ctx.store.insert_message(&new).await? {
        InsertOutcome::Inserted(id) => (id, false),
        InsertOutcome::Duplicate => {
            let message_id = new.message_id.clone().unwrap_or_default();
            let existing = ctx
                .store
                .message_by_message_id(&message_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
            if existing.interception_status != Some(InterceptionStatus::Intercepted) {
                session.mailbox.logout().await?;
                let status = existing.interception_status.map_or_else(|| "none".to_string(), |s| s.to_string());
                return Err(Error::conflict(format!("message {} is {status}", existing.id)));
            }
            (existing.id, true)
        }
    };

    let started = Utc::now();
    let folder =
        move_to_quarantine(&mut session.mailbox, &[uid], &session.targets, ctx.config.force_copy_purge).await?;
    let latency = (Utc::now() - started).num_milliseconds();
    ctx.store.mark_held(email_id, &folder, Some(latency)).await?;
    info!(account_id = account_id.0, uid, email_id, folder = %folder, "Manually intercepted");

    session.mailbox.logout().await?;
    Ok(ManualIntercept { email_id, folder, already_stored })
}
