//! Shared application state for HTTP and WebSocket handlers

use std::sync::Arc;

use crate::store::EntityStore;
use crate::types::{EntityPath, InvalidationNotice};

use super::broadcaster::InvalidationBus;

/// Shared application state
pub struct AppState {
    /// The entity store served by the REST layer
    pub store: Arc<EntityStore>,

    /// Fan-out to connected WebSocket sessions
    pub bus: Arc<InvalidationBus>,
}

impl AppState {
    pub fn new(store: Arc<EntityStore>, bus: Arc<InvalidationBus>) -> Self {
        Self { store, bus }
    }

    /// Notice every new session receives first: the whole collection is
    /// stale, so the client refetches everything it holds.
    pub fn bootstrap_notice(&self) -> InvalidationNotice {
        InvalidationNotice::new(EntityPath::collection(self.store.collection()))
    }
}
