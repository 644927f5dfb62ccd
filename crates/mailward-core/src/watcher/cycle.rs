//! One detection cycle over an open session.

use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

use chrono::Utc;
use mailward_imap::Capability;
use tracing::{debug, info, warn};

use super::mailbox::{FetchedMessage, Mailbox, MailboxInfo, find_by_message_id};
use crate::config::WatcherConfig;
use crate::mail::ParsedMail;
use crate::quarantine;
use crate::rules::{Evaluation, evaluate};
use crate::store::{
    Account, AccountId, Direction, InsertOutcome, InterceptionStatus, MessageStatus, NewMessage, Store,
};
use crate::{Error, Result};

/// Where the next cycle starts looking.
///
/// The resume UID never moves backwards. It starts past the highest UID
/// already stored; the server's UIDNEXT is only used as an upper bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UidTracker {
    /// Lowest UID not yet examined.
    pub resume_uid: u32,
    /// UIDNEXT from the last SELECT.
    pub last_uidnext: Option<u32>,
    /// Released copies appended by this service; never examined.
    pub skip: HashSet<u32>,
}

impl UidTracker {
    /// Tracker for a fresh session.
    #[must_use]
    pub fn new(store_max_uid: u32, info: MailboxInfo) -> Self {
        Self {
            resume_uid: store_max_uid.saturating_add(1).max(1),
            last_uidnext: info.uid_next,
            skip: HashSet::new(),
        }
    }

    /// Moves the resume pointer forward after a cycle.
    pub fn advance(&mut self, store_max_uid: u32, max_processed: Option<u32>) {
        let processed_next = max_processed.map_or(0, |uid| uid.saturating_add(1));
        self.resume_uid = self
            .resume_uid
            .max(store_max_uid.saturating_add(1))
            .max(processed_next);
    }
}

/// What a cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages fetched and examined.
    pub examined: usize,
    /// Newly inserted rows that matched a hold rule.
    pub intercepted: usize,
    /// Rows moved to quarantine and marked HELD.
    pub held: usize,
}

/// A connected account: the session plus everything resolved at connect.
pub struct AccountSession<M> {
    /// The IMAP session, INBOX selected between operations.
    pub mailbox: M,
    /// Account snapshot taken at connect.
    pub account: Account,
    /// Resolved quarantine folder.
    pub quarantine: String,
    /// Move targets, resolved folder first.
    pub targets: Vec<String>,
    /// UID bookkeeping.
    pub tracker: UidTracker,
    /// INTERCEPTED rows already looked for outside INBOX this session.
    pub unplaced: HashSet<i64>,
}

impl<M: Mailbox> AccountSession<M> {
    /// Resolves the quarantine folder, selects INBOX and computes the
    /// resume UID.
    ///
    /// # Errors
    ///
    /// Returns an error if INBOX cannot be selected or the store fails.
    pub async fn open(mut mailbox: M, account: Account, store: &Store, config: &WatcherConfig) -> Result<Self> {
        let preference = config.quarantine_preference;
        let folder = quarantine::resolve(&mut mailbox, &account.quarantine_folder, preference).await?;
        let delimiter = mailbox.delimiter().await.unwrap_or(None);
        let mut targets = vec![folder.clone()];
        targets.extend(
            quarantine::candidates(&account.quarantine_folder, delimiter, preference)
                .into_iter()
                .filter(|c| *c != folder),
        );

        let info = mailbox.select("INBOX").await?;
        let tracker = UidTracker::new(store.max_uid(account.id).await?, info);
        info!(
            account_id = account.id.0,
            quarantine = %folder,
            resume_uid = tracker.resume_uid,
            uid_next = ?info.uid_next,
            "Watcher session open"
        );
        Ok(Self { mailbox, account, quarantine: folder, targets, tracker, unplaced: HashSet::new() })
    }

    fn account_id(&self) -> AccountId {
        self.account.id
    }

    /// Runs one cycle: find candidates, store them, move held ones.
    ///
    /// # Errors
    ///
    /// Returns an error on any IMAP or store failure; the caller reconnects.
    pub async fn run_cycle(&mut self, store: &Store, config: &WatcherConfig) -> Result<CycleReport> {
        let info = self.mailbox.select("INBOX").await?;
        self.tracker.last_uidnext = info.uid_next;
        let inbox = self.mailbox.uid_search_all().await?;
        let candidates = self.candidates(store, &inbox, info.uid_next, config.sweep_last_n).await?;
        self.process_and_move(store, config, &inbox, &candidates).await
    }

    /// After IDLE reported new mail but the cycle found nothing: examine
    /// unseen UIDs at or past the resume pointer.
    ///
    /// # Errors
    ///
    /// Returns an error on any IMAP or store failure.
    pub async fn unseen_fallback(&mut self, store: &Store, config: &WatcherConfig) -> Result<CycleReport> {
        let unseen = self.mailbox.uid_search_unseen().await?;
        let in_range: Vec<u32> = unseen
            .into_iter()
            .filter(|uid| *uid >= self.tracker.resume_uid && !self.tracker.skip.contains(uid))
            .collect();
        let known = store.known_uids(self.account_id(), &in_range).await?;
        let candidates: Vec<u32> = in_range.into_iter().filter(|uid| !known.contains(uid)).collect();
        if !candidates.is_empty() {
            debug!(account_id = self.account_id().0, ?candidates, "UNSEEN fallback found messages");
        }
        let inbox = self.mailbox.uid_search_all().await?;
        self.process_and_move(store, config, &inbox, &candidates).await
    }

    async fn candidates(&self, store: &Store, inbox: &[u32], uid_next: Option<u32>, sweep: usize) -> Result<Vec<u32>> {
        let upper = uid_next.unwrap_or(u32::MAX);
        let mut set: BTreeSet<u32> = inbox
            .iter()
            .copied()
            .filter(|uid| *uid >= self.tracker.resume_uid && *uid < upper)
            .collect();
        set.extend(inbox.iter().rev().take(sweep).copied());
        set.retain(|uid| !self.tracker.skip.contains(uid));

        let list: Vec<u32> = set.into_iter().collect();
        let known = store.known_uids(self.account_id(), &list).await?;
        Ok(list.into_iter().filter(|uid| !known.contains(uid)).collect())
    }

    async fn process_and_move(
        &mut self,
        store: &Store,
        config: &WatcherConfig,
        inbox: &[u32],
        candidates: &[u32],
    ) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let mut max_processed = None;
        let mut fresh = HashSet::new();

        if !candidates.is_empty() {
            let messages = self.mailbox.fetch(candidates).await?;
            for message in messages {
                let uid = message.uid;
                max_processed = max_processed.max(Some(uid));
                report.examined += 1;
                if let Some(id) = self.ingest(store, message).await? {
                    fresh.insert(id);
                    report.intercepted += 1;
                }
            }
        }

        // Rows from this cycle plus any whose move failed earlier.
        let in_inbox: HashSet<u32> = inbox.iter().copied().collect();
        let (pending, orphaned): (Vec<(i64, u32)>, Vec<(i64, u32)>) = store
            .intercepted_uids(self.account_id())
            .await?
            .into_iter()
            .partition(|(_, uid)| in_inbox.contains(uid));
        if !pending.is_empty() {
            let uids: Vec<u32> = pending.iter().map(|(_, uid)| *uid).collect();
            match move_to_quarantine(&mut self.mailbox, &uids, &self.targets, config.force_copy_purge).await {
                Ok(folder) => {
                    let latency = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
                    for (id, _) in &pending {
                        let latency = fresh.contains(id).then_some(latency);
                        if store.mark_held(*id, &folder, latency).await? {
                            report.held += 1;
                        }
                    }
                    info!(account_id = self.account_id().0, folder = %folder, count = report.held, "Moved to quarantine");
                }
                Err(e) => {
                    warn!(account_id = self.account_id().0, ?uids, error = %e, "Quarantine move failed, will retry");
                }
            }
        }

        if !orphaned.is_empty() {
            report.held += self.reconcile(store, &orphaned).await?;
        }

        let store_max = store.max_uid(self.account_id()).await?;
        self.tracker.advance(store_max, max_processed);
        Ok(report)
    }

    /// INTERCEPTED rows whose UID is gone from INBOX, e.g. a move that
    /// landed but was never recorded. Marks them HELD when the message
    /// is found in a move target. Leaves INBOX selected.
    async fn reconcile(&mut self, store: &Store, orphaned: &[(i64, u32)]) -> Result<usize> {
        let mut lost = Vec::new();
        for (id, _) in orphaned {
            if !self.unplaced.insert(*id) {
                continue;
            }
            if let Some(message) = store.get_message(*id).await?
                && let Some(message_id) = message.original_message_id
            {
                lost.push((*id, message_id));
            }
        }
        if lost.is_empty() {
            return Ok(0);
        }

        let mut held = 0;
        for folder in &self.targets {
            if lost.is_empty() {
                break;
            }
            if let Err(e) = self.mailbox.select(folder).await {
                debug!(folder = %folder, error = %e, "Cannot look in move target");
                continue;
            }
            let mut missing = Vec::new();
            for (id, message_id) in lost {
                if find_by_message_id(&mut self.mailbox, &message_id).await?.is_empty() {
                    missing.push((id, message_id));
                } else if store.mark_held(id, folder, None).await? {
                    info!(id, folder = %folder, "Found intercepted message already in quarantine");
                    held += 1;
                }
            }
            lost = missing;
        }
        if !lost.is_empty() {
            let ids: Vec<i64> = lost.iter().map(|(id, _)| *id).collect();
            warn!(account_id = self.account_id().0, ?ids, "Intercepted messages missing from INBOX and quarantine");
        }
        self.mailbox.select("INBOX").await?;
        Ok(held)
    }

    /// Stores one fetched message. Returns the row id when it was
    /// intercepted.
    async fn ingest(&mut self, store: &Store, message: FetchedMessage) -> Result<Option<i64>> {
        let uid = message.uid;
        let parsed = ParsedMail::parse(&message.raw);
        if let Some(email_id) = parsed.release_claim {
            if store.is_release_copy(self.account_id(), email_id).await? {
                debug!(uid, email_id, "Skipping released copy");
                self.tracker.skip.insert(uid);
                return Ok(None);
            }
            warn!(uid, email_id, "Release marker matches no release, evaluating");
        }

        let evaluation = evaluate(&parsed.fields(), &store.active_rules().await?);
        let status = if evaluation.should_hold {
            InterceptionStatus::Intercepted
        } else {
            InterceptionStatus::Fetched
        };
        let new = new_inbound(self.account_id(), &parsed, &evaluation, status, message);
        match store.insert_message(&new).await? {
            InsertOutcome::Inserted(id) => {
                debug!(id, uid = ?new.original_uid, %status, risk = evaluation.risk_score, "Stored message");
                Ok(evaluation.should_hold.then_some(id))
            }
            InsertOutcome::Duplicate => {
                debug!(uid, "Duplicate Message-ID, skipped");
                self.tracker.skip.insert(uid);
                Ok(None)
            }
        }
    }
}

/// Row for a message read from INBOX.
pub(crate) fn new_inbound(
    account_id: AccountId,
    parsed: &ParsedMail,
    evaluation: &Evaluation,
    status: InterceptionStatus,
    message: FetchedMessage,
) -> NewMessage {
    let message_id = parsed
        .message_id
        .clone()
        .unwrap_or_else(|| format!("imap_{}_{}", message.uid, Utc::now().timestamp()));
    NewMessage {
        account_id: Some(account_id),
        message_id: Some(message_id),
        direction: Direction::Inbound,
        interception_status: Some(status),
        status: MessageStatus::Pending,
        sender: parsed.sender.clone(),
        recipients: parsed.recipients.clone(),
        subject: parsed.subject.clone(),
        body_text: parsed.body_text.clone(),
        body_html: parsed.body_html.clone(),
        raw_content: Some(message.raw),
        raw_path: None,
        original_uid: Some(message.uid),
        original_internaldate: message.internal_date,
        original_message_id: parsed.message_id.clone(),
        risk_score: evaluation.risk_score,
        keywords_matched: evaluation.matched_keywords.clone(),
        quarantine_folder: None,
        latency_ms: None,
    }
}

/// Moves `uids` out of the selected INBOX. Returns the folder they landed
/// in.
///
/// `UID MOVE` is tried first when available. Otherwise, or when it fails,
/// each target gets COPY (creating the folder once if needed), then
/// `\Deleted`, then EXPUNGE with UID EXPUNGE as the fallback.
///
/// # Errors
///
/// Returns the last error when no target accepted the messages.
pub async fn move_to_quarantine<M: Mailbox>(
    mailbox: &mut M,
    uids: &[u32],
    targets: &[String],
    force_copy_purge: bool,
) -> Result<String> {
    let Some(primary) = targets.first() else {
        return Err(Error::Config("no quarantine target".to_string()));
    };
    if uids.is_empty() {
        return Ok(primary.clone());
    }

    if !force_copy_purge && mailbox.has_capability(&Capability::Move) {
        match mailbox.uid_move(uids, primary).await {
            Ok(()) => return Ok(primary.clone()),
            Err(e) => warn!(folder = %primary, error = %e, "UID MOVE failed, falling back to copy"),
        }
    }

    let mut last_error = None;
    for target in targets {
        match copy_and_purge(mailbox, uids, target).await {
            Ok(()) => return Ok(target.clone()),
            Err(e) => {
                debug!(folder = %target, error = %e, "Copy to quarantine target failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::Config("no quarantine target".to_string())))
}

async fn copy_and_purge<M: Mailbox>(mailbox: &mut M, uids: &[u32], target: &str) -> Result<()> {
    if let Err(e) = mailbox.uid_copy(uids, target).await {
        debug!(folder = %target, error = %e, "COPY failed, creating folder");
        if let Err(e) = mailbox.create(target).await {
            debug!(folder = %target, error = %e, "CREATE failed");
        }
        mailbox.uid_copy(uids, target).await?;
    }
    mailbox.uid_add_deleted(uids).await?;
    if let Err(e) = mailbox.expunge().await {
        debug!(error = %e, "EXPUNGE failed, trying UID EXPUNGE");
        mailbox.uid_expunge(uids).await?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::rules::{ConditionField, NewRule};
    use crate::store::NewAccount;
    use crate::watcher::fake::{FakeMailbox, FakeMessage, FakeServer};

    fn mail(subject: &str, message_id: &str) -> Vec<u8> {
        format!(
            "From: sender@outside.example\r\nTo: me@corp.example\r\nSubject: {subject}\r\nMessage-ID: {message_id}\r\n\r\nbody\r\n"
        )
        .into_bytes()
    }

    async fn setup() -> (Store, Account) {
        let store = Store::in_memory().await.unwrap();
        store
            .insert_rule(&NewRule::keyword("urgent", ConditionField::Subject, "urgent", 80))
            .await
            .unwrap();
        let id = store.insert_account(&NewAccount::with_email("me@corp.example")).await.unwrap();
        let account = store.get_account(id).await.unwrap().unwrap();
        (store, account)
    }

    #[test]
    fn test_tracker_never_regresses() {
        let mut tracker = UidTracker::new(0, MailboxInfo { uid_next: Some(40), exists: 3 });
        assert_eq!(tracker.resume_uid, 1);
        tracker.advance(10, Some(12));
        assert_eq!(tracker.resume_uid, 13);
        tracker.advance(3, None);
        assert_eq!(tracker.resume_uid, 13);
        tracker.advance(20, Some(5));
        assert_eq!(tracker.resume_uid, 21);
    }

    #[tokio::test]
    async fn test_cycle_holds_and_moves() {
        let (store, account) = setup().await;
        let server = FakeServer::shared();
        {
            let mut s = server.lock().unwrap();
            s.deliver("INBOX", &mail("Lunch", "<a@x>"));
            s.deliver("INBOX", &mail("URGENT wire", "<b@x>"));
        }
        let config = WatcherConfig::default();
        let mut session = AccountSession::open(FakeMailbox::open(server.clone()), account.clone(), &store, &config)
            .await
            .unwrap();
        assert_eq!(session.quarantine, "Quarantine");

        let report = session.run_cycle(&store, &config).await.unwrap();
        assert_eq!(report, CycleReport { examined: 2, intercepted: 1, held: 1 });
        assert_eq!(session.tracker.resume_uid, 3);

        let held = store.message_by_message_id("<b@x>").await.unwrap().unwrap();
        assert_eq!(held.interception_status, Some(InterceptionStatus::Held));
        assert_eq!(held.quarantine_folder.as_deref(), Some("Quarantine"));
        assert!(held.latency_ms.is_some());
        let passed = store.message_by_message_id("<a@x>").await.unwrap().unwrap();
        assert_eq!(passed.interception_status, Some(InterceptionStatus::Fetched));

        let s = server.lock().unwrap();
        assert_eq!(s.uids("INBOX"), vec![1]);
        assert_eq!(s.uids("Quarantine").len(), 1);
    }

    #[tokio::test]
    async fn test_second_cycle_skips_known_uids() {
        let (store, account) = setup().await;
        let server = FakeServer::shared();
        server.lock().unwrap().deliver("INBOX", &mail("hello", "<a@x>"));
        let config = WatcherConfig::default();
        let mut session = AccountSession::open(FakeMailbox::open(server.clone()), account, &store, &config)
            .await
            .unwrap();

        assert_eq!(session.run_cycle(&store, &config).await.unwrap().examined, 1);
        assert_eq!(session.run_cycle(&store, &config).await.unwrap().examined, 0);

        server.lock().unwrap().deliver("INBOX", &mail("again", "<c@x>"));
        let report = session.run_cycle(&store, &config).await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(session.tracker.resume_uid, 3);
    }

    #[tokio::test]
    async fn test_resume_starts_past_stored_uids() {
        let (store, account) = setup().await;
        let server = FakeServer::shared();
        {
            let mut s = server.lock().unwrap();
            for i in 0..3 {
                s.deliver("INBOX", &mail("old", &format!("<old{i}@x>")));
            }
        }
        let config = WatcherConfig::default();
        let mut first = AccountSession::open(FakeMailbox::open(server.clone()), account.clone(), &store, &config)
            .await
            .unwrap();
        first.run_cycle(&store, &config).await.unwrap();

        let second = AccountSession::open(FakeMailbox::open(server), account, &store, &config)
            .await
            .unwrap();
        assert_eq!(second.tracker.resume_uid, 4);
    }

    #[tokio::test]
    async fn test_candidates_window_with_sweep() {
        let (store, account) = setup().await;
        store
            .insert_message(&NewMessage {
                account_id: Some(account.id),
                message_id: Some("<seen@x>".into()),
                interception_status: Some(InterceptionStatus::Fetched),
                original_uid: Some(150),
                ..NewMessage::default()
            })
            .await
            .unwrap();

        let server = FakeServer::shared();
        {
            let mut s = server.lock().unwrap();
            let inbox = s.folders.get_mut("INBOX").unwrap();
            for uid in [100, 150, 151, 160] {
                inbox.messages.insert(
                    uid,
                    FakeMessage {
                        raw: mail("old", &format!("<u{uid}@x>")),
                        internal_date: None,
                        deleted: false,
                        seen: false,
                    },
                );
            }
            inbox.uid_next = 200;
        }
        let config = WatcherConfig { sweep_last_n: 2, ..WatcherConfig::default() };
        let mut session = AccountSession::open(FakeMailbox::open(server), account, &store, &config)
            .await
            .unwrap();
        assert_eq!(session.tracker.resume_uid, 151);

        let info = session.mailbox.select("INBOX").await.unwrap();
        let inbox = session.mailbox.uid_search_all().await.unwrap();
        let candidates = session.candidates(&store, &inbox, info.uid_next, config.sweep_last_n).await.unwrap();
        assert_eq!(candidates, vec![151, 160]);
    }

    #[tokio::test]
    async fn test_released_copy_is_skipped() {
        let (store, account) = setup().await;
        let InsertOutcome::Inserted(id) = store
            .insert_message(&NewMessage {
                account_id: Some(account.id),
                message_id: Some("<held@x>".into()),
                interception_status: Some(InterceptionStatus::Intercepted),
                original_uid: Some(90),
                ..NewMessage::default()
            })
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };
        store.mark_held(id, "Quarantine", None).await.unwrap();
        store.mark_released(id, None).await.unwrap();

        let server = FakeServer::shared();
        let raw = format!(
            "Subject: URGENT\r\nMessage-ID: <held@x>\r\nX-Mailward-Release-Bypass: release-{id}\r\nX-Mailward-Email-ID: {id}\r\n\r\nbody"
        );
        server.lock().unwrap().deliver("INBOX", raw.as_bytes());
        let config = WatcherConfig::default();
        let mut session = AccountSession::open(FakeMailbox::open(server.clone()), account.clone(), &store, &config)
            .await
            .unwrap();

        let report = session.run_cycle(&store, &config).await.unwrap();
        assert_eq!(report.intercepted, 0);
        assert!(session.tracker.skip.contains(&1));
        assert_eq!(server.lock().unwrap().uids("INBOX"), vec![1]);
    }

    #[tokio::test]
    async fn test_forged_release_marker_is_still_evaluated() {
        let (store, account) = setup().await;
        let server = FakeServer::shared();
        {
            let mut s = server.lock().unwrap();
            s.deliver(
                "INBOX",
                b"Subject: URGENT wire now\r\nMessage-ID: <f1@x>\r\nX-Mailward-Release-Bypass: spoofed\r\n\r\nbody",
            );
            // Well formed, but no such release exists.
            s.deliver(
                "INBOX",
                b"Subject: URGENT wire now\r\nMessage-ID: <f2@x>\r\nX-Mailward-Release-Bypass: release-77\r\nX-Mailward-Email-ID: 77\r\n\r\nbody",
            );
        }
        let config = WatcherConfig::default();
        let mut session = AccountSession::open(FakeMailbox::open(server.clone()), account, &store, &config)
            .await
            .unwrap();

        let report = session.run_cycle(&store, &config).await.unwrap();
        assert_eq!(report, CycleReport { examined: 2, intercepted: 2, held: 2 });
        for mid in ["<f1@x>", "<f2@x>"] {
            let row = store.message_by_message_id(mid).await.unwrap().unwrap();
            assert_eq!(row.interception_status, Some(InterceptionStatus::Held));
        }
        let s = server.lock().unwrap();
        assert!(s.uids("INBOX").is_empty());
        assert_eq!(s.uids("Quarantine").len(), 2);
    }

    #[tokio::test]
    async fn test_failed_move_stays_intercepted_then_retries() {
        let (store, account) = setup().await;
        let server = FakeServer::shared();
        {
            let mut s = server.lock().unwrap();
            s.deliver("INBOX", &mail("urgent", "<u@x>"));
            s.fail_move = true;
            s.capabilities.retain(|c| *c != Capability::UidPlus);
        }
        let config = WatcherConfig::default();
        let mut session = AccountSession::open(FakeMailbox::open(server.clone()), account.clone(), &store, &config)
            .await
            .unwrap();
        // Make every copy target unusable.
        session.targets = vec!["Nowhere".to_string()];
        server.lock().unwrap().deny_create.insert("Nowhere".into());

        let report = session.run_cycle(&store, &config).await.unwrap();
        assert_eq!((report.intercepted, report.held), (1, 0));
        let row = store.message_by_message_id("<u@x>").await.unwrap().unwrap();
        assert_eq!(row.interception_status, Some(InterceptionStatus::Intercepted));

        // Next cycle with a working target picks the row up again.
        session.targets = vec!["Quarantine".to_string()];
        let report = session.run_cycle(&store, &config).await.unwrap();
        assert_eq!((report.examined, report.held), (0, 1));
        let row = store.message_by_message_id("<u@x>").await.unwrap().unwrap();
        assert_eq!(row.interception_status, Some(InterceptionStatus::Held));
        assert!(row.latency_ms.is_none());
    }

    #[tokio::test]
    async fn test_intercepted_row_found_in_quarantine_becomes_held() {
        let (store, account) = setup().await;
        let mut ids = Vec::new();
        for (uid, mid) in [(5, "<q@x>"), (6, "<gone@x>")] {
            let InsertOutcome::Inserted(id) = store
                .insert_message(&NewMessage {
                    account_id: Some(account.id),
                    message_id: Some(mid.into()),
                    interception_status: Some(InterceptionStatus::Intercepted),
                    original_uid: Some(uid),
                    original_message_id: Some(mid.into()),
                    ..NewMessage::default()
                })
                .await
                .unwrap()
            else {
                panic!("expected insert");
            };
            ids.push(id);
        }
        let server = FakeServer::shared();
        server.lock().unwrap().deliver("Quarantine", &mail("URGENT wire", "<q@x>"));
        let config = WatcherConfig::default();
        let mut session = AccountSession::open(FakeMailbox::open(server.clone()), account, &store, &config)
            .await
            .unwrap();

        let report = session.run_cycle(&store, &config).await.unwrap();
        assert_eq!(report, CycleReport { examined: 0, intercepted: 0, held: 1 });
        let found = store.get_message(ids[0]).await.unwrap().unwrap();
        assert_eq!(found.interception_status, Some(InterceptionStatus::Held));
        assert_eq!(found.quarantine_folder.as_deref(), Some("Quarantine"));
        let gone = store.get_message(ids[1]).await.unwrap().unwrap();
        assert_eq!(gone.interception_status, Some(InterceptionStatus::Intercepted));
        assert!(session.unplaced.contains(&ids[1]));

        // INBOX is selected again for the next command.
        {
            let mut s = server.lock().unwrap();
            s.deliver("INBOX", &mail("hello", "<h1@x>"));
            s.deliver("INBOX", &mail("hello", "<h2@x>"));
        }
        let inbox = server.lock().unwrap().uids("INBOX");
        assert_eq!(session.mailbox.uid_search_all().await.unwrap(), inbox);
    }

    #[tokio::test]
    async fn test_duplicate_uid_is_not_refetched() {
        let (store, account) = setup().await;
        store
            .insert_message(&NewMessage {
                account_id: Some(account.id),
                message_id: Some("<dup@x>".into()),
                interception_status: Some(InterceptionStatus::Held),
                ..NewMessage::default()
            })
            .await
            .unwrap();
        let server = FakeServer::shared();
        server.lock().unwrap().deliver("INBOX", &mail("hello", "<dup@x>"));
        let config = WatcherConfig { sweep_last_n: 5, ..WatcherConfig::default() };
        let mut session = AccountSession::open(FakeMailbox::open(server), account, &store, &config)
            .await
            .unwrap();

        let first = session.run_cycle(&store, &config).await.unwrap();
        assert_eq!((first.examined, first.intercepted), (1, 0));
        assert!(session.tracker.skip.contains(&1));
        assert_eq!(session.run_cycle(&store, &config).await.unwrap().examined, 0);
    }

    #[tokio::test]
    async fn test_copy_fallback_creates_folder_once() {
        let server = FakeServer::shared();
        server.lock().unwrap().deliver("INBOX", b"Subject: a\r\n\r\n");
        server.lock().unwrap().deliver("INBOX", b"Subject: b\r\n\r\n");
        let mut mailbox = FakeMailbox::open(server.clone());

        let folder = move_to_quarantine(&mut mailbox, &[1, 2], &["Held".to_string()], true).await.unwrap();
        assert_eq!(folder, "Held");
        let s = server.lock().unwrap();
        assert!(s.uids("INBOX").is_empty());
        assert_eq!(s.uids("Held"), vec![1, 2]);
        assert!(s.log.iter().any(|l| l == "CREATE Held"));
        assert!(!s.log.iter().any(|l| l.starts_with("MOVE")));
    }
}
