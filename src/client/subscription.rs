//! Client subscription: socket lifecycle and notice handling
//!
//! ```text
//!   Disconnected ──► Connecting ──► Connected
//!        ▲               │              │
//!        └── backoff ◄───┴── error ◄────┘
//! ```
//!
//! Each text frame is decoded as an invalidation notice and applied to the
//! cache. Frames that are not notices, including the server's `Echo:`
//! replies, are dropped without ending the connection. Nothing is
//! invalidated on disconnect; the server's bootstrap notice on the next
//! connection resyncs the whole collection.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::ClientCache;
use super::connector::{Connection, Connector};
use crate::types::{EntityPath, InvalidationNotice, SyncResult};

const OUTBOUND_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Exponential backoff between connection attempts
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl ReconnectConfig {
    /// Delay to use after waiting `current`
    pub fn next_delay(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.multiplier.max(1))
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub reconnect: ReconnectConfig,
    /// Refetch invalidated entries in the background as notices arrive
    pub refetch_on_invalidate: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            refetch_on_invalidate: true,
        }
    }
}

/// Why a connected session ended
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Dropped,
    Shutdown,
}

/// Keeps a [`ClientCache`] in step with the server's notices
pub struct ClientSubscription<C: Connector> {
    connector: C,
    cache: Arc<ClientCache>,
    config: SubscriptionConfig,
}

impl<C: Connector> ClientSubscription<C> {
    pub fn new(connector: C, cache: Arc<ClientCache>, config: SubscriptionConfig) -> Self {
        Self {
            connector,
            cache,
            config,
        }
    }

    /// Run the connection loop on a background task
    pub fn spawn(self) -> SubscriptionHandle {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(self.run(state_tx, outbound_rx, shutdown_rx));

        SubscriptionHandle {
            state: state_rx,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(
        self,
        state: watch::Sender<ConnectionState>,
        mut outbound: mpsc::Receiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let reconnect = self.config.reconnect.clone();
        let mut delay = reconnect.initial_delay;

        loop {
            state.send_replace(ConnectionState::Connecting);

            let attempt = tokio::select! {
                result = self.connector.connect() => result,
                _ = shutdown.changed() => break,
            };

            match attempt {
                Ok(connection) => {
                    info!("subscription connected");
                    state.send_replace(ConnectionState::Connected);
                    delay = reconnect.initial_delay;

                    let end = self.pump(connection, &mut outbound, &mut shutdown).await;
                    state.send_replace(ConnectionState::Disconnected);
                    if end == SessionEnd::Shutdown {
                        break;
                    }
                    info!(?delay, "subscription lost, reconnecting");
                }
                Err(e) => {
                    state.send_replace(ConnectionState::Disconnected);
                    warn!(error = %e, ?delay, "connect failed, retrying");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            delay = reconnect.next_delay(delay);
        }

        state.send_replace(ConnectionState::Disconnected);
        debug!("subscription stopped");
    }

    async fn pump(
        &self,
        connection: Connection,
        outbound: &mut mpsc::Receiver<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let Connection {
            mut incoming,
            mut outgoing,
        } = connection;

        loop {
            tokio::select! {
                frame = incoming.next() => match frame {
                    Some(Ok(text)) => {
                        self.on_frame(&text);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "subscription transport error");
                        return SessionEnd::Dropped;
                    }
                    None => return SessionEnd::Dropped,
                },

                message = outbound.recv() => match message {
                    Some(text) => {
                        if let Err(e) = outgoing.send(text).await {
                            warn!(error = %e, "send failed");
                            return SessionEnd::Dropped;
                        }
                    }
                    // Every handle is gone
                    None => {
                        let _ = outgoing.close().await;
                        return SessionEnd::Shutdown;
                    }
                },

                _ = shutdown.changed() => {
                    let _ = outgoing.close().await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    /// Apply one frame. Never awaits, so a slow refetch cannot hold up the
    /// next notice.
    fn on_frame(&self, text: &str) {
        match apply_frame(&self.cache, text) {
            Ok(keys) => {
                if self.config.refetch_on_invalidate && !keys.is_empty() {
                    let cache = Arc::clone(&self.cache);
                    tokio::spawn(async move {
                        let refreshed = cache.refresh(keys).await;
                        debug!(refreshed, "background refetch done");
                    });
                }
            }
            Err(e) => debug!(error = %e, frame = %text, "dropping frame"),
        }
    }
}

/// Decode `text` and invalidate the matching cache entries
pub fn apply_frame(cache: &ClientCache, text: &str) -> SyncResult<Vec<EntityPath>> {
    let notice = InvalidationNotice::decode(text)?;
    Ok(cache.invalidate(&notice.path))
}

/// Control surface of a running subscription
pub struct SubscriptionHandle {
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::Sender<String>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the subscription reaches `target`
    pub async fn wait_for(&self, target: ConnectionState) -> bool {
        let mut state = self.state.clone();
        let reached = state.wait_for(|current| *current == target).await.is_ok();
        reached
    }

    /// Queue diagnostic text for the server. Returns false when not
    /// connected or the queue is full.
    pub fn send(&self, text: impl Into<String>) -> bool {
        if self.state() != ConnectionState::Connected {
            warn!("subscription is not connected");
            return false;
        }
        self.outbound.try_send(text.into()).is_ok()
    }

    /// Stop the loop and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
