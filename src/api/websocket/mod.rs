//! WebSocket module for live cache invalidation
//!
//! Provides the WebSocket endpoint at `/ws`. Every connection first receives
//! the bootstrap notice `{"entity":["sensors"]}`, then one
//! `{"entity":["sensors","details",<id>]}` frame per entity change.
//!
//! ## Features
//! - Per-session bounded queues, one slow client never stalls the rest
//! - Idempotent session close, also on drop
//! - Resync on reconnect instead of replay

pub mod broadcaster;
pub mod handler;
pub mod session;
pub mod state;

// Re-export commonly used items
pub use broadcaster::{DeliveryFailure, InvalidationBus, SessionId, SessionLink};
pub use session::{SessionState, TransportSession};
pub use state::AppState;
