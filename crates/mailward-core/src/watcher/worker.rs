//! The per-account watcher task.
//!
//! One task per active account: connect, run a cycle, wait for the next
//! trigger (IDLE when the server has it, a polling sleep otherwise), repeat.
//! Failures go through the circuit breaker and back off before
//! reconnecting.

use std::sync::Arc;
use std::time::Duration;

use mailward_imap::Capability;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::cycle::AccountSession;
use super::mailbox::{Connector, IdleOutcome, Mailbox};
use crate::Result;
use crate::config::WatcherConfig;
use crate::policy::{CircuitBreaker, CircuitState, RetryPolicy};
use crate::store::{AccountId, Store, WorkerStatus};

/// Published watcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Not connected.
    Disconnected,
    /// Connecting and opening the session.
    Connecting,
    /// Waiting in IDLE.
    Idle,
    /// Sleeping between polls.
    Polling,
    /// Shutting down.
    Stopping,
}

impl WatcherState {
    /// Lowercase name, as shown by the CLI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Stopping => "stopping",
        }
    }
}

/// What every watcher shares.
pub struct WatcherContext<C> {
    /// Database.
    pub store: Store,
    /// Opens IMAP sessions.
    pub connector: Arc<C>,
    /// Detection settings.
    pub config: WatcherConfig,
    /// Reconnect backoff.
    pub retry: RetryPolicy,
    /// Failure counting.
    pub breaker: CircuitBreaker,
}

impl<C> Clone for WatcherContext<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
            retry: self.retry.clone(),
            breaker: self.breaker,
        }
    }
}

/// How a wait between cycles ended.
enum Wake {
    NewMail,
    Elapsed,
    IdleFailed,
    Stop,
}

/// Watches one account until stopped, deactivated or tripped.
pub struct Watcher<C> {
    ctx: WatcherContext<C>,
    account_id: AccountId,
    state: watch::Sender<WatcherState>,
    stop: watch::Receiver<bool>,
}

impl<C: Connector> Watcher<C> {
    /// Creates a watcher and the receiver its state is published on.
    #[must_use]
    pub fn new(
        ctx: WatcherContext<C>,
        account_id: AccountId,
        stop: watch::Receiver<bool>,
    ) -> (Self, watch::Receiver<WatcherState>) {
        let (state, state_rx) = watch::channel(WatcherState::Disconnected);
        (Self { ctx, account_id, state, stop }, state_rx)
    }

    /// Runs until a stop is requested, the account goes inactive or the
    /// circuit opens.
    pub async fn run(mut self) {
        let mut attempt = 0u32;
        info!(account_id = self.account_id.0, "Watcher started");

        loop {
            if self.stopping() {
                break;
            }
            match self.ctx.store.is_account_active(self.account_id).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(account_id = self.account_id.0, "Account inactive, watcher exiting");
                    break;
                }
                Err(e) => warn!(account_id = self.account_id.0, error = %e, "Could not read account state"),
            }

            self.set_state(WatcherState::Connecting);
            let Err(error) = self.session(&mut attempt).await else {
                break;
            };
            self.set_state(WatcherState::Disconnected);

            match self.ctx.breaker.record_failure(&self.ctx.store, self.account_id, &error).await {
                Ok(CircuitState::Open) => break,
                Ok(CircuitState::Closed { .. }) => {}
                Err(e) => warn!(account_id = self.account_id.0, error = %e, "Could not record failure"),
            }

            attempt = attempt.saturating_add(1);
            let delay = self.ctx.retry.delay(attempt);
            debug!(account_id = self.account_id.0, attempt, ?delay, "Reconnecting after backoff");
            if self.sleep_or_stop(delay).await {
                break;
            }
        }

        self.set_state(WatcherState::Stopping);
        self.beat(WorkerStatus::Stopped).await;
        self.set_state(WatcherState::Disconnected);
        info!(account_id = self.account_id.0, "Watcher stopped");
    }

    /// One connection's lifetime. `Ok` means a clean exit.
    async fn session(&mut self, attempt: &mut u32) -> Result<()> {
        let Some(account) = self.ctx.store.get_account(self.account_id).await? else {
            return Ok(());
        };
        let mailbox = self.ctx.connector.connect(&account).await?;
        let mut session = AccountSession::open(mailbox, account, &self.ctx.store, &self.ctx.config).await?;

        let config = self.ctx.config.clone();
        let mut idle_failures = 0u32;
        let mut polling_until: Option<Instant> = None;
        let mut after_new_mail = false;

        loop {
            if self.stopping() || !self.ctx.store.is_account_active(self.account_id).await? {
                if let Err(e) = session.mailbox.logout().await {
                    debug!(error = %e, "LOGOUT failed");
                }
                return Ok(());
            }

            let report = session.run_cycle(&self.ctx.store, &config).await?;
            if after_new_mail && report.examined == 0 {
                session.unseen_fallback(&self.ctx.store, &config).await?;
            }
            after_new_mail = false;
            self.ctx.breaker.record_success(&self.ctx.store, self.account_id).await?;
            self.ctx.store.touch_last_checked(self.account_id).await?;
            *attempt = 0;

            if polling_until.is_some_and(|until| Instant::now() >= until) {
                info!(account_id = self.account_id.0, "IDLE cooldown over");
                polling_until = None;
                idle_failures = 0;
            }
            let use_idle = config.idle_enabled
                && polling_until.is_none()
                && session.mailbox.has_capability(&Capability::Idle);

            let wake = if use_idle {
                self.set_state(WatcherState::Idle);
                self.beat(WorkerStatus::Idle).await;
                self.idle(&mut session.mailbox, &config).await?
            } else {
                self.set_state(WatcherState::Polling);
                self.beat(WorkerStatus::Polling).await;
                if self.sleep_or_stop(config.poll_interval()).await { Wake::Stop } else { Wake::Elapsed }
            };

            match wake {
                Wake::Stop => return Ok(()),
                Wake::NewMail => {
                    idle_failures = 0;
                    after_new_mail = true;
                    session.mailbox.noop().await?;
                }
                Wake::Elapsed => {
                    idle_failures = 0;
                    session.mailbox.noop().await?;
                }
                Wake::IdleFailed => {
                    idle_failures += 1;
                    if idle_failures >= config.idle_failure_limit {
                        warn!(
                            account_id = self.account_id.0,
                            failures = idle_failures,
                            "IDLE keeps failing, polling for a while"
                        );
                        polling_until = Some(Instant::now() + config.idle_cooldown());
                    }
                    session.mailbox.noop().await?;
                }
            }
        }
    }

    /// Waits in IDLE slices until new mail, the ping interval or a stop.
    async fn idle<M: Mailbox>(&mut self, mailbox: &mut M, config: &WatcherConfig) -> Result<Wake> {
        let window = config.idle_ping().min(config.idle_timeout()).max(Duration::from_secs(1));
        let slice = config.idle_check().max(Duration::from_secs(1)).min(window);
        let started = Instant::now();

        while started.elapsed() < window {
            let wait = slice.min(window - started.elapsed());
            let outcome = tokio::select! {
                outcome = mailbox.idle_wait(wait) => outcome,
                _ = self.stop.changed() => return Ok(Wake::Stop),
            };
            match outcome {
                Ok(IdleOutcome::NewMail) => return Ok(Wake::NewMail),
                Ok(IdleOutcome::Timeout) => {}
                Ok(IdleOutcome::Unsupported) => return Ok(Wake::IdleFailed),
                Err(e) => {
                    warn!(account_id = self.account_id.0, error = %e, "IDLE failed");
                    return Ok(Wake::IdleFailed);
                }
            }
            if self.stopping() || !self.ctx.store.is_account_active(self.account_id).await? {
                return Ok(Wake::Stop);
            }
        }
        Ok(Wake::Elapsed)
    }

    fn stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Sleeps for `delay`. Returns true if a stop arrived first.
    async fn sleep_or_stop(&mut self, delay: Duration) -> bool {
        if self.stopping() {
            return true;
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => self.stopping(),
            _ = self.stop.changed() => true,
        }
    }

    fn set_state(&self, state: WatcherState) {
        self.state.send_replace(state);
    }

    async fn beat(&self, status: WorkerStatus) {
        if let Err(e) = self.ctx.store.heartbeat(&self.account_id.worker_id(), status).await {
            warn!(account_id = self.account_id.0, error = %e, "Heartbeat write failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::rules::{ConditionField, NewRule};
    use crate::store::{InterceptionStatus, NewAccount};
    use crate::watcher::fake::{FakeConnector, FakeServer};

    fn context(store: &Store, server: &Arc<std::sync::Mutex<FakeServer>>) -> WatcherContext<FakeConnector> {
        let config = WatcherConfig { idle_check_secs: 1, poll_interval_secs: 1, ..WatcherConfig::default() };
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        };
        WatcherContext {
            store: store.clone(),
            connector: Arc::new(FakeConnector::new(server.clone())),
            config,
            retry,
            breaker: CircuitBreaker::new(3),
        }
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_watcher_holds_then_stops() {
        let store = Store::in_memory().await.unwrap();
        store
            .insert_rule(&NewRule::keyword("invoice", ConditionField::Subject, "invoice", 70))
            .await
            .unwrap();
        let id = store.insert_account(&NewAccount::with_email("me@corp.example")).await.unwrap();
        let server = FakeServer::shared();
        server
            .lock()
            .unwrap()
            .deliver("INBOX", b"Subject: Invoice overdue\r\nMessage-ID: <i1@x>\r\n\r\npay");

        let (stop_tx, stop_rx) = watch::channel(false);
        let (watcher, mut state) = Watcher::new(context(&store, &server), id, stop_rx);
        let task = tokio::spawn(watcher.run());

        wait_for(|| {
            let store = store.clone();
            async move {
                store
                    .message_by_message_id("<i1@x>")
                    .await
                    .unwrap()
                    .is_some_and(|m| m.interception_status == Some(InterceptionStatus::Held))
            }
        })
        .await;
        state.wait_for(|s| *s == WatcherState::Idle).await.unwrap();

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(*state.borrow(), WatcherState::Disconnected);
        let beat = store.get_heartbeat(&id.worker_id()).await.unwrap().unwrap();
        assert_eq!(beat.status, WorkerStatus::Stopped);
        assert!(store.get_account(id).await.unwrap().unwrap().last_checked.is_some());
    }

    #[tokio::test]
    async fn test_new_mail_during_idle_is_caught() {
        let store = Store::in_memory().await.unwrap();
        store
            .insert_rule(&NewRule::keyword("wire", ConditionField::Body, "wire transfer", 90))
            .await
            .unwrap();
        let id = store.insert_account(&NewAccount::with_email("me@corp.example")).await.unwrap();
        let server = FakeServer::shared();

        let (stop_tx, stop_rx) = watch::channel(false);
        let (watcher, mut state) = Watcher::new(context(&store, &server), id, stop_rx);
        let task = tokio::spawn(watcher.run());
        state.wait_for(|s| *s == WatcherState::Idle).await.unwrap();

        {
            let mut s = server.lock().unwrap();
            s.deliver("INBOX", b"Subject: hi\r\nMessage-ID: <w1@x>\r\n\r\nplease send the wire transfer");
            s.idle_signal = true;
        }
        wait_for(|| {
            let server = server.clone();
            async move { server.lock().unwrap().uids("INBOX").is_empty() }
        })
        .await;

        stop_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(server.lock().unwrap().uids("Quarantine").len(), 1);
    }

    #[tokio::test]
    async fn test_polling_without_idle_capability() {
        let store = Store::in_memory().await.unwrap();
        let id = store.insert_account(&NewAccount::with_email("me@corp.example")).await.unwrap();
        let server = FakeServer::shared();
        server.lock().unwrap().capabilities.retain(|c| *c != Capability::Idle);

        let (stop_tx, stop_rx) = watch::channel(false);
        let (watcher, mut state) = Watcher::new(context(&store, &server), id, stop_rx);
        let task = tokio::spawn(watcher.run());
        state.wait_for(|s| *s == WatcherState::Polling).await.unwrap();

        server.lock().unwrap().deliver("INBOX", b"Subject: later\r\nMessage-ID: <p1@x>\r\n\r\n");
        wait_for(|| {
            let store = store.clone();
            async move { store.message_by_message_id("<p1@x>").await.unwrap().is_some() }
        })
        .await;

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_circuit_opens_after_repeated_auth_failures() {
        let store = Store::in_memory().await.unwrap();
        let id = store.insert_account(&NewAccount::with_email("me@corp.example")).await.unwrap();
        let server = FakeServer::shared();
        server.lock().unwrap().refuse_connect = Some("LOGIN rejected".into());

        let (_stop_tx, stop_rx) = watch::channel(false);
        let (watcher, _state) = Watcher::new(context(&store, &server), id, stop_rx);
        tokio::time::timeout(Duration::from_secs(5), watcher.run()).await.unwrap();

        assert_eq!(server.lock().unwrap().connects, 3);
        let account = store.get_account(id).await.unwrap().unwrap();
        assert!(!account.is_active);
        assert_eq!(account.last_error.as_deref(), Some("circuit_open:auth_failed"));
    }

    #[tokio::test]
    async fn test_inactive_account_exits_without_connecting() {
        let store = Store::in_memory().await.unwrap();
        let id = store.insert_account(&NewAccount::with_email("me@corp.example")).await.unwrap();
        store.set_account_active(id, false).await.unwrap();
        let server = FakeServer::shared();

        let (_stop_tx, stop_rx) = watch::channel(false);
        let (watcher, _state) = Watcher::new(context(&store, &server), id, stop_rx);
        watcher.run().await;
        assert_eq!(server.lock().unwrap().connects, 0);
    }
}
