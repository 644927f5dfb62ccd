//! TCP listener that runs one [`Session`] per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::error::Result;
use crate::session::{DeliveryHandler, ServerConfig, Session};

/// How long open sessions may run after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Accepts SMTP clients until told to stop.
pub struct Listener<H> {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    handler: Arc<H>,
}

impl<H: DeliveryHandler> Listener<H> {
    /// Binds to `addr` (e.g. `127.0.0.1:8587`).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs, config: ServerConfig, handler: Arc<H>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config: Arc::new(config), handler })
    }

    /// Address actually bound, useful with port 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until `shutdown` becomes `true` or its sender is dropped, then
    /// waits a bounded time for open sessions to finish.
    ///
    /// # Errors
    ///
    /// Accept errors are logged, not returned; this only fails if the
    /// listener itself is unusable.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "SMTP listener started");
        let mut sessions = JoinSet::new();

        if !*shutdown.borrow_and_update() {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "SMTP connection accepted");
                            let session = Session::new(stream, Arc::clone(&self.config), Arc::clone(&self.handler), Some(peer));
                            sessions.spawn(async move {
                                if let Err(e) = session.run().await {
                                    tracing::debug!(%peer, error = %e, "SMTP session ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    },
                    Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                        if let Err(e) = joined {
                            tracing::warn!(error = %e, "SMTP session task failed");
                        }
                    }
                }
            }
        }

        tracing::info!(%addr, open = sessions.len(), "SMTP listener stopping, finishing sessions");
        let drain = async { while sessions.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!("SMTP sessions did not finish in time, aborting");
            sessions.abort_all();
        }
        Ok(())
    }
}
