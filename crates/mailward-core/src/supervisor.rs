//! Owns the watcher tasks.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::store::AccountId;
use crate::watcher::{Connector, Watcher, WatcherContext, WatcherState};
use crate::{Error, Result};

/// How long `stop` waits for a watcher to exit before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

struct WatcherHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
    state: watch::Receiver<WatcherState>,
}

impl WatcherHandle {
    fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    async fn shut(self, account_id: AccountId) {
        self.stop.send_replace(true);
        let mut join = self.join;
        match tokio::time::timeout(STOP_TIMEOUT, &mut join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(account_id = account_id.0, error = %e, "Watcher task failed"),
            Err(_) => {
                warn!(account_id = account_id.0, "Watcher did not stop in time, aborting");
                join.abort();
            }
        }
    }
}

/// Starts, stops and reports on one watcher per account.
pub struct Supervisor<C> {
    ctx: WatcherContext<C>,
    handles: Mutex<HashMap<AccountId, WatcherHandle>>,
}

impl<C: Connector> Supervisor<C> {
    /// Creates a supervisor with no watchers.
    #[must_use]
    pub fn new(ctx: WatcherContext<C>) -> Self {
        Self { ctx, handles: Mutex::new(HashMap::new()) }
    }

    /// Starts a watcher for the account. Returns false if one is already
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown account.
    pub async fn start(&self, account_id: AccountId) -> Result<bool> {
        if self.ctx.store.get_account(account_id).await?.is_none() {
            return Err(Error::NotFound(format!("account {account_id}")));
        }

        let mut handles = self.handles.lock().await;
        if handles.get(&account_id).is_some_and(WatcherHandle::is_running) {
            return Ok(false);
        }
        handles.retain(|_, handle| handle.is_running());

        let (stop, stop_rx) = watch::channel(false);
        let (watcher, state) = Watcher::new(self.ctx.clone(), account_id, stop_rx);
        let join = tokio::spawn(watcher.run());
        handles.insert(account_id, WatcherHandle { stop, join, state });
        info!(account_id = account_id.0, "Watcher spawned");
        Ok(true)
    }

    /// Stops the account's watcher. Returns false if none was running.
    pub async fn stop(&self, account_id: AccountId) -> bool {
        let handle = self.handles.lock().await.remove(&account_id);
        match handle {
            Some(handle) => {
                let was_running = handle.is_running();
                handle.shut(account_id).await;
                was_running
            }
            None => false,
        }
    }

    /// True if the account's watcher task is alive.
    pub async fn is_running(&self, account_id: AccountId) -> bool {
        self.handles.lock().await.get(&account_id).is_some_and(WatcherHandle::is_running)
    }

    /// Published state of a running watcher.
    pub async fn status(&self, account_id: AccountId) -> Option<WatcherState> {
        let handles = self.handles.lock().await;
        handles
            .get(&account_id)
            .filter(|h| h.is_running())
            .map(|h| *h.state.borrow())
    }

    /// States of every running watcher, by account id.
    pub async fn statuses(&self) -> Vec<(AccountId, WatcherState)> {
        let handles = self.handles.lock().await;
        let mut out: Vec<_> = handles
            .iter()
            .filter(|(_, h)| h.is_running())
            .map(|(id, h)| (*id, *h.state.borrow()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Starts watchers for every active account. Returns how many were
    /// started.
    ///
    /// # Errors
    ///
    /// Returns an error if the accounts cannot be read.
    pub async fn start_all_active(&self) -> Result<usize> {
        let mut started = 0;
        for account in self.ctx.store.active_accounts().await? {
            if self.start(account.id).await? {
                started += 1;
            }
        }
        info!(started, "Started watchers for active accounts");
        Ok(started)
    }

    /// Stops every watcher.
    pub async fn shutdown(&self) {
        let drained: Vec<(AccountId, WatcherHandle)> = self.handles.lock().await.drain().collect();
        for (_, handle) in &drained {
            handle.stop.send_replace(true);
        }
        for (account_id, handle) in drained {
            handle.shut(account_id).await;
        }
        info!("All watchers stopped");
    }
}
