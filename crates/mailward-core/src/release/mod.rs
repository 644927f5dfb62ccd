//! Release, edit and discard of held messages.
//!
//! A release rebuilds the message from its stored MIME and the reviewer's
//! edits, appends it to the target folder with a bypass header so the
//! watcher ignores it, removes the quarantined original and verifies the
//! new copy arrived. A per-message lock and an optional idempotency key
//! make concurrent and repeated calls safe.
//!
//! ```text
//! (none) ──→ FETCHED
//! (none) ──→ INTERCEPTED ──→ HELD ──→ RELEASED
//! (none) ─────────────────→ HELD ──→ DISCARDED
//! ```

mod rebuild;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mailward_mime::Headers;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use rebuild::{ATTACHMENTS_REMOVED, Content, assemble, html_from_text};

use crate::attachments::{self, Manifest, build_plan};
use crate::config::ReleaseConfig;
use crate::mail::{ParsedMail, RELEASE_BYPASS_HEADER, RELEASE_EMAIL_ID_HEADER};
use crate::store::{self, AttachmentKind, IdempotencyStatus, InterceptionStatus, Message, Store};
use crate::watcher::{Connector, Mailbox, find_by_message_id};
use crate::{Error, Result};

/// Reviewer changes applied at release time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseEdits {
    /// New subject.
    pub subject: Option<String>,
    /// New plain-text body.
    pub body_text: Option<String>,
    /// New HTML body.
    pub body_html: Option<String>,
    /// Drop every original attachment.
    pub strip_attachments: bool,
}

/// Result of a release, also the stored idempotent response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    /// Released row.
    pub email_id: i64,
    /// Status after the call.
    pub status: InterceptionStatus,
    /// Message-ID of the delivered copy.
    pub message_id: Option<String>,
    /// Folder the copy was appended to.
    pub folder: Option<String>,
    /// True if a new Message-ID was issued.
    pub edited: bool,
    /// Set when nothing was done, e.g. `already-released`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Served from the idempotency record.
    #[serde(default)]
    pub replayed: bool,
}

/// Result of a discard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscardOutcome {
    /// Target row.
    pub email_id: i64,
    /// Status after the call.
    pub status: Option<InterceptionStatus>,
    /// Rows changed.
    pub changed: u64,
    /// It was already discarded.
    pub already: bool,
    /// Not HELD, nothing to do.
    pub noop: bool,
}

/// Runs releases, discards and edits against the store and IMAP.
pub struct Coordinator<C> {
    store: Store,
    connector: Arc<C>,
    config: ReleaseConfig,
    attachments_root: PathBuf,
}

impl<C: Connector> Coordinator<C> {
    /// Creates a coordinator. Attachments are extracted under
    /// `attachments_root`.
    #[must_use]
    pub fn new(store: Store, connector: Arc<C>, config: ReleaseConfig, attachments_root: PathBuf) -> Self {
        Self { store, connector, config, attachments_root }
    }

    async fn load(&self, email_id: i64) -> Result<Message> {
        self.store
            .get_message(email_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("message {email_id}")))
    }

    /// Releases a held message.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the message does not exist.
    /// - [`Error::Conflict`] with `discarded`, `not-held` or
    ///   `release-in-progress`; nothing is changed.
    /// - [`Error::Release`] or an IMAP/store error if a step failed after
    ///   the lock was taken; the idempotency key is marked failed.
    pub async fn release(
        &self,
        email_id: i64,
        edits: &ReleaseEdits,
        idempotency_key: Option<&str>,
    ) -> Result<ReleaseOutcome> {
        if let Some(key) = idempotency_key
            && let Some(record) = self.store.idempotency(key).await?
        {
            if record.email_id != email_id {
                return Err(Error::conflict("idempotency-key-mismatch"));
            }
            match record.status {
                IdempotencyStatus::Success => {
                    let json = record.response_json.unwrap_or_default();
                    let mut outcome: ReleaseOutcome = serde_json::from_str(&json)?;
                    outcome.replayed = true;
                    return Ok(outcome);
                }
                IdempotencyStatus::Pending => return Err(Error::conflict("release-in-progress")),
                IdempotencyStatus::Failed => self.store.delete_idempotency(key).await?,
            }
        }

        let message = self.load(email_id).await?;
        if let Some(done) = settled(&message)? {
            return Ok(done);
        }

        if !self.store.try_acquire_release_lock(email_id, self.config.lock_stale()).await? {
            return Err(Error::conflict("release-in-progress"));
        }

        // Another release may have finished between the read and the lock.
        let result: Result<ReleaseOutcome> = async {
            let message = self.load(email_id).await?;
            match settled(&message)? {
                Some(done) => Ok(done),
                None => self.release_locked(&message, edits, idempotency_key).await,
            }
        }
        .await;
        if let (Err(e), Some(key)) = (&result, idempotency_key) {
            let response = serde_json::json!({ "error": e.to_string() }).to_string();
            if let Err(store_err) = self.store.finish_idempotency(key, IdempotencyStatus::Failed, &response).await {
                warn!(email_id, error = %store_err, "Could not record failed release");
            }
        }
        if let Err(e) = self.store.release_lock(email_id).await {
            warn!(email_id, error = %e, "Could not release lock");
        }
        result
    }

    async fn release_locked(
        &self,
        message: &Message,
        edits: &ReleaseEdits,
        idempotency_key: Option<&str>,
    ) -> Result<ReleaseOutcome> {
        let email_id = message.id;
        if let Some(key) = idempotency_key {
            self.store.begin_idempotency(key, email_id).await?;
        }

        let raw = self.raw_mime(message).await?;
        let original = ParsedMail::parse(&raw);
        let headers = Headers::parse(&raw);

        let originals = attachments::ensure_originals(&self.store, email_id, &raw, &self.attachments_root).await?;
        let staged = self.store.attachments(email_id, AttachmentKind::Staged).await?;
        let manifest = Manifest::from_stored(message.attachments_manifest.as_deref());
        let plan = build_plan(&originals, &staged, &manifest, edits.strip_attachments);

        let subject = edits.subject.clone().unwrap_or_else(|| message.subject.clone());
        let mut text = edits
            .body_text
            .clone()
            .or_else(|| message.body_text.clone())
            .unwrap_or_default();
        let html_source = edits.body_html.clone().or_else(|| message.body_html.clone());
        let text_changed = text != original.body_text.clone().unwrap_or_default();
        let content_edited = subject != original.subject || text_changed || html_source != original.body_html;

        let mut html = html_source.unwrap_or_else(|| html_from_text(&text));
        if edits.strip_attachments && !plan.removed.is_empty() {
            text = format!("{text}\n\n{ATTACHMENTS_REMOVED}");
            html = format!("{html}<br><br>{ATTACHMENTS_REMOVED}");
        }

        let edited = content_edited || plan.changed();
        let original_id = message
            .original_message_id
            .clone()
            .or_else(|| original.message_id.clone());
        let new_id = match (&original_id, edited) {
            (Some(id), false) => id.clone(),
            _ => format!("<{}@mailward>", Uuid::new_v4()),
        };
        let bypass = format!("release-{email_id}");
        let extra = [
            ("X-Mailward-Released-From", original_id.clone().unwrap_or_else(|| "<unknown>".to_string())),
            (RELEASE_BYPASS_HEADER, bypass.clone()),
            (RELEASE_EMAIL_ID_HEADER, email_id.to_string()),
        ];
        let bytes = assemble(&headers, &Content { subject, text, html }, &new_id, &extra, &plan).await?;

        let account_id = message.account_id.ok_or_else(|| Error::Release("no-account".to_string()))?;
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;
        let mut mailbox = self.connector.connect(&account).await?;
        let target = self.config.target_folder.clone();

        // APPEND unless an earlier attempt already delivered it.
        mailbox.select(&target).await?;
        if released_copies(&mut mailbox, &new_id, &bypass).await?.is_empty() {
            mailbox
                .append(&target, &[], message.original_internaldate.as_deref(), &bytes)
                .await?;
            debug!(email_id, folder = %target, message_id = %new_id, "Appended released copy");
        }

        if let Some(folder) = &message.quarantine_folder {
            remove_quarantined(&mut mailbox, folder, original_id.as_deref(), &headers, &raw).await?;
        }
        if let Some(id) = &original_id {
            self.clean_inbox(&mut mailbox, id, &bypass).await?;
        }

        mailbox.select(&target).await?;
        if released_copies(&mut mailbox, &new_id, &bypass).await?.is_empty() {
            return Err(Error::Release("verify-failed".to_string()));
        }
        if let Err(e) = mailbox.logout().await {
            debug!(error = %e, "LOGOUT failed");
        }

        let edited_id = edited.then_some(new_id.as_str());
        if !self.store.mark_released(email_id, edited_id).await? {
            return Err(Error::conflict("not-held"));
        }
        for staged in self.store.delete_staged(email_id).await? {
            if let Err(e) = tokio::fs::remove_file(&staged.storage_path).await {
                debug!(path = %staged.storage_path, error = %e, "Could not remove staged file");
            }
        }

        let outcome = ReleaseOutcome {
            email_id,
            status: InterceptionStatus::Released,
            message_id: Some(new_id),
            folder: Some(target),
            edited,
            reason: None,
            replayed: false,
        };
        if let Some(key) = idempotency_key {
            let response = serde_json::to_string(&outcome)?;
            self.store.finish_idempotency(key, IdempotencyStatus::Success, &response).await?;
        }
        info!(email_id, message_id = ?outcome.message_id, edited, "Released");
        Ok(outcome)
    }

    async fn raw_mime(&self, message: &Message) -> Result<Vec<u8>> {
        if let Some(path) = &message.raw_path {
            match tokio::fs::read(path).await {
                Ok(raw) => return Ok(raw),
                Err(e) => warn!(email_id = message.id, path = %path, error = %e, "Raw file unreadable"),
            }
        }
        message
            .raw_content
            .clone()
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| Error::Release("raw-missing".to_string()))
    }

    /// Removes INBOX copies of the original, keeping the released one.
    async fn clean_inbox<M: Mailbox>(&self, mailbox: &mut M, original_id: &str, bypass: &str) -> Result<()> {
        mailbox.select("INBOX").await?;
        for attempt in 0..self.config.cleanup_attempts {
            let released = mailbox.uid_search_header(RELEASE_BYPASS_HEADER, bypass).await?;
            let strays: Vec<u32> = find_by_message_id(mailbox, original_id)
                .await?
                .into_iter()
                .filter(|uid| !released.contains(uid))
                .collect();
            if strays.is_empty() {
                break;
            }
            purge(mailbox, &strays).await?;
            debug!(?strays, attempt, "Removed stray INBOX copies");

            // Late copies can still show up; look again after a pause.
            if attempt + 1 < self.config.cleanup_attempts {
                let delay = self.config.cleanup_base_delay_ms.saturating_mul(1 << attempt.min(16));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
        Ok(())
    }

    /// Discards a held message. Calling it again is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the message does not exist, or
    /// [`Error::Conflict`] (`release-in-progress`) while a release holds
    /// its lock.
    pub async fn discard(&self, email_id: i64) -> Result<DiscardOutcome> {
        let message = self.load(email_id).await?;
        let mut outcome = DiscardOutcome {
            email_id,
            status: message.interception_status,
            changed: 0,
            already: false,
            noop: false,
        };
        match message.interception_status {
            Some(InterceptionStatus::Discarded) => outcome.already = true,
            Some(InterceptionStatus::Held) => {
                if !self.store.try_acquire_release_lock(email_id, self.config.lock_stale()).await? {
                    return Err(Error::conflict("release-in-progress"));
                }
                let changed = self.store.mark_discarded(email_id).await;
                if let Err(e) = self.store.release_lock(email_id).await {
                    warn!(email_id, error = %e, "Could not release lock");
                }
                outcome.changed = changed?;
                if outcome.changed > 0 {
                    outcome.status = Some(InterceptionStatus::Discarded);
                    info!(email_id, "Discarded");
                } else {
                    outcome.noop = true;
                }
            }
            _ => outcome.noop = true,
        }
        Ok(outcome)
    }

    async fn load_held(&self, email_id: i64) -> Result<Message> {
        let message = self.load(email_id).await?;
        if message.interception_status == Some(InterceptionStatus::Held) {
            Ok(message)
        } else {
            Err(Error::conflict("not-held"))
        }
    }

    /// Persists reviewer edits on a held message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Conflict`] (`not-held`).
    pub async fn apply_edits(
        &self,
        email_id: i64,
        subject: Option<&str>,
        body_text: Option<&str>,
        body_html: Option<&str>,
    ) -> Result<()> {
        self.load_held(email_id).await?;
        self.store.update_edits(email_id, subject, body_text, body_html).await?;
        Ok(())
    }

    /// Stages an uploaded attachment for a held message and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`], [`Error::Conflict`] (`not-held`) or an
    /// I/O error.
    pub async fn stage_attachment(&self, email_id: i64, filename: &str, data: &[u8], mime_type: &str) -> Result<i64> {
        self.load_held(email_id).await?;
        attachments::stage(&self.store, &self.attachments_root, email_id, filename, data, mime_type).await
    }

    /// Replaces the pending attachment changes of a held message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Conflict`] (`not-held`).
    pub async fn set_manifest(&self, email_id: i64, mut manifest: Manifest) -> Result<()> {
        self.load_held(email_id).await?;
        manifest.updated_at = Some(store::now());
        self.store.set_manifest(email_id, &manifest).await
    }
}

/// `Some` if the message is already released, an error if it cannot be.
fn settled(message: &Message) -> Result<Option<ReleaseOutcome>> {
    match message.interception_status {
        Some(InterceptionStatus::Held) => Ok(None),
        Some(InterceptionStatus::Released) => Ok(Some(ReleaseOutcome {
            email_id: message.id,
            status: InterceptionStatus::Released,
            message_id: message.edited_message_id.clone().or_else(|| message.message_id.clone()),
            folder: None,
            edited: false,
            reason: Some("already-released".to_string()),
            replayed: false,
        })),
        Some(InterceptionStatus::Discarded) => Err(Error::conflict("discarded")),
        _ => Err(Error::conflict("not-held")),
    }
}

/// UIDs of the copy a release appended to the selected folder.
async fn released_copies<M: Mailbox>(mailbox: &mut M, message_id: &str, bypass: &str) -> Result<Vec<u32>> {
    let tagged = mailbox.uid_search_header(RELEASE_BYPASS_HEADER, bypass).await?;
    Ok(find_by_message_id(mailbox, message_id)
        .await?
        .into_iter()
        .filter(|uid| tagged.contains(uid))
        .collect())
}

/// Deletes the original from the quarantine folder. Without a Message-ID
/// the copy is found by its exact bytes.
async fn remove_quarantined<M: Mailbox>(
    mailbox: &mut M,
    folder: &str,
    original_id: Option<&str>,
    headers: &Headers,
    raw: &[u8],
) -> Result<()> {
    mailbox.select(folder).await?;
    let uids = match original_id {
        Some(id) => find_by_message_id(mailbox, id).await?,
        None => find_by_content(mailbox, headers, raw).await?,
    };
    if !uids.is_empty() {
        purge(mailbox, &uids).await?;
        debug!(folder, ?uids, "Removed quarantined original");
    }
    Ok(())
}

/// UIDs in the selected folder holding exactly `raw`, narrowed by
/// subject first when there is one.
async fn find_by_content<M: Mailbox>(mailbox: &mut M, headers: &Headers, raw: &[u8]) -> Result<Vec<u32>> {
    let candidates = match headers.get("Subject").map(str::trim).filter(|s| !s.is_empty()) {
        Some(subject) => mailbox.uid_search_header("Subject", subject).await?,
        None => mailbox.uid_search_all().await?,
    };
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    Ok(mailbox
        .fetch(&candidates)
        .await?
        .into_iter()
        .filter(|m| m.raw == raw)
        .map(|m| m.uid)
        .collect())
}

async fn purge<M: Mailbox>(mailbox: &mut M, uids: &[u32]) -> Result<()> {
    mailbox.uid_add_deleted(uids).await?;
    if let Err(e) = mailbox.expunge().await {
        debug!(error = %e, "EXPUNGE failed, trying UID EXPUNGE");
        mailbox.uid_expunge(uids).await?;
    }
    Ok(())
}
