//! Client side of the invalidation protocol
//!
//! - `cache`: query results keyed by entity path, with staleness tracking
//! - `subscription`: the socket loop that turns notices into invalidations
//! - `connector`: how connections are opened (WebSocket by default)
//! - `fetch`: how fresh values are read back (REST by default)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sensor_sync::client::{
//!     ClientCache, ClientSubscription, HttpFetcher, SubscriptionConfig, WsConnector,
//! };
//! use sensor_sync::EntityPath;
//!
//! # async fn demo() -> sensor_sync::SyncResult<()> {
//! let cache = Arc::new(ClientCache::new(Arc::new(HttpFetcher::new("http://localhost:3000"))));
//! let subscription = ClientSubscription::new(
//!     WsConnector::new("ws://localhost:3000/ws"),
//!     Arc::clone(&cache),
//!     SubscriptionConfig::default(),
//! )
//! .spawn();
//!
//! let sensor = cache.read(&EntityPath::details("sensors", "sensor-1")).await?;
//! println!("{sensor}");
//! subscription.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod connector;
pub mod fetch;
pub mod subscription;

pub use cache::{CacheEntry, ClientCache, Staleness};
pub use connector::{Connection, Connector, FrameSink, FrameStream, WsConnector};
pub use fetch::{Fetcher, HttpFetcher};
pub use subscription::{
    apply_frame, ClientSubscription, ConnectionState, ReconnectConfig, SubscriptionConfig,
    SubscriptionHandle,
};
