//! Server-side transport session lifecycle

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::broadcaster::{InvalidationBus, SessionId, SessionLink};
use crate::types::{InvalidationNotice, SyncError, SyncResult};

/// Lifecycle of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

/// One connected client, as seen by the bus.
///
/// Closing is idempotent and also happens on drop, so a socket task that
/// exits through any path unregisters exactly once.
///
/// The session holds the queue's only sender until `open` hands it to the
/// bus. When the bus drops the session, the sender goes with it and the
/// socket task sees its queue close.
pub struct TransportSession {
    id: Option<SessionId>,
    state: SessionState,
    link: Option<SessionLink>,
    bus: Arc<InvalidationBus>,
}

impl TransportSession {
    /// Create a session and the queue its socket task drains
    pub fn new(bus: Arc<InvalidationBus>) -> (Self, mpsc::Receiver<String>) {
        let (link, outbound) = bus.channel();
        let session = Self {
            id: None,
            state: SessionState::Connecting,
            link: Some(link),
            bus,
        };
        (session, outbound)
    }

    /// Queue the bootstrap notice and join the broadcast set.
    ///
    /// The bootstrap frame is queued before registration so it always
    /// precedes any broadcast the session receives.
    pub fn open(&mut self, bootstrap: &InvalidationNotice) -> SyncResult<SessionId> {
        if self.state != SessionState::Connecting {
            return Err(SyncError::Transport(format!(
                "cannot open session in state {:?}",
                self.state
            )));
        }

        let link = self
            .link
            .take()
            .ok_or_else(|| SyncError::Transport("session has no outbound queue".into()))?;
        link.push(bootstrap.encode()?)
            .map_err(|failure| SyncError::Transport(format!("bootstrap not queued: {failure:?}")))?;

        let id = self.bus.register(link);
        self.id = Some(id);
        self.state = SessionState::Open;
        info!(session = id, sessions = self.bus.session_count(), "client connected");
        Ok(id)
    }

    /// Leave the broadcast set. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        self.link = None;

        match self.id {
            Some(id) => {
                self.bus.unregister(id);
                info!(session = id, sessions = self.bus.session_count(), "client disconnected");
            }
            None => debug!("session closed before opening"),
        }
        true
    }

    pub fn id(&self) -> Option<SessionId> {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}
