//! Sensor Sync
//!
//! Live cache invalidation for server-held entities over WebSocket.
//!
//! The server names every changed entity by path and broadcasts
//! `{"entity": [...]}` to all connected clients. Clients map the path onto
//! their cached query results and mark exactly the related ones stale, then
//! refetch them over REST. Delivery is lossy on purpose: nothing is replayed,
//! and every (re)connect begins with a notice for the whole collection so
//! the client resyncs.
//!
//! # Modules
//!
//! - `types`: Entity, EntityPath, InvalidationNotice, SyncError
//! - `store`: EntityStore with per-entity locking and change events
//! - `producer`: periodic per-sensor position updates
//! - `api`: Axum router, REST endpoints, WebSocket sessions and the bus
//! - `client`: ClientCache and ClientSubscription
//! - `server`: wiring for the binary and integration tests
//! - `config`: environment configuration
//! - `utils`: timestamps
//!
//! # Example
//!
//! ```no_run
//! use sensor_sync::{Config, SyncServer};
//!
//! #[tokio::main]
//! async fn main() -> sensor_sync::SyncResult<()> {
//!     let server = SyncServer::new(Config::from_env());
//!     let listener = server.bind().await?;
//!     server
//!         .serve(listener, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod producer;
pub mod server;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use api::websocket::{AppState, InvalidationBus, TransportSession};
pub use client::{ClientCache, ClientSubscription};
pub use config::Config;
pub use producer::ChangeProducer;
pub use server::SyncServer;
pub use store::{EntityChange, EntityStore};
pub use types::{Entity, EntityPath, InvalidationNotice, SyncError, SyncResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
