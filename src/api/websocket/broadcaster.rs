//! Invalidation bus
//!
//! Keeps the set of open transport sessions and fans invalidation notices
//! out to them. Each session owns a bounded outbound queue that its socket
//! task drains, so a slow socket never stalls delivery to the others.
//!
//! # Delivery
//!
//! Delivery is lossy but self-healing. A notice is never retried. When a
//! session's queue is full or its receiver is gone, the session is dropped
//! from the set; its socket task sees the queue close, shuts the
//! connection, and the client's reconnect receives the bootstrap notice that
//! resynchronizes everything.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::EntityStore;
use crate::types::{EntityPath, InvalidationNotice, SyncResult};

/// Identifier handed out by [`InvalidationBus::register`]
pub type SessionId = u64;

/// Default outbound queue length per session
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Bus-side handle to one session's outbound queue
#[derive(Debug, Clone)]
pub struct SessionLink {
    outbound: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
}

impl SessionLink {
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            outbound,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queue a frame without waiting on the socket
    pub fn push(&self, frame: String) -> Result<(), DeliveryFailure> {
        if !self.open.load(Ordering::Acquire) {
            return Err(DeliveryFailure::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }
}

/// Why a frame could not be queued for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    QueueFull,
    Closed,
}

/// Fans invalidation notices out to every open session
pub struct InvalidationBus {
    sessions: RwLock<HashMap<SessionId, SessionLink>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl InvalidationBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Create a session queue sized for this bus
    pub fn channel(&self) -> (SessionLink, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        (SessionLink::new(tx), rx)
    }

    /// Add a session to the broadcast set
    pub fn register(&self, link: SessionLink) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.write().insert(id, link);
        debug!(session = id, "session registered");
        id
    }

    /// Remove a session. Returns false if it was already gone.
    ///
    /// Broadcasts hold the read side of the session lock for their whole
    /// fan-out, so once this returns no notice can reach the session.
    pub fn unregister(&self, id: SessionId) -> bool {
        match self.sessions.write().remove(&id) {
            Some(link) => {
                link.mark_closed();
                debug!(session = id, "session unregistered");
                true
            }
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_registered(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Announce `path` to every open session. Returns how many sessions
    /// the notice was queued for.
    pub fn broadcast(&self, path: &EntityPath) -> SyncResult<usize> {
        self.notify(&InvalidationNotice::new(path.clone()))
    }

    /// Send an already-built notice to every open session
    pub fn notify(&self, notice: &InvalidationNotice) -> SyncResult<usize> {
        let frame = notice.encode()?;
        let mut delivered = 0;
        let mut failed = Vec::new();

        {
            let sessions = self.sessions.read();
            for (id, link) in sessions.iter() {
                if !link.is_open() {
                    failed.push((*id, DeliveryFailure::Closed));
                    continue;
                }
                match link.push(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(failure) => failed.push((*id, failure)),
                }
            }
        }

        for (id, failure) in failed {
            if self.unregister(id) {
                warn!(session = id, ?failure, "dropping session that cannot take notices");
            }
        }

        debug!(path = %notice.path, delivered, "notice broadcast");
        Ok(delivered)
    }

    /// Forward every store change to the sessions.
    ///
    /// If this forwarder falls behind the store's change buffer, individual
    /// paths are lost, so it broadcasts the collection root instead and every
    /// client resyncs.
    pub fn attach(self: &Arc<Self>, store: &EntityStore) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        let mut changes = store.subscribe();
        let root = EntityPath::collection(store.collection());

        tokio::spawn(async move {
            loop {
                let path = match changes.recv().await {
                    Ok(change) => change.path,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "change forwarder lagged, forcing full resync");
                        root.clone()
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if let Err(e) = bus.broadcast(&path) {
                    warn!(%path, error = %e, "failed to broadcast change");
                }
            }
            info!("store closed, change forwarder stopped");
        })
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
