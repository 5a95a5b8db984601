//! Data types for the sensor sync server and client
//!
//! This module contains the entity model, entity paths, the invalidation
//! notice wire format, and the shared error type.

mod entity;
mod error;
mod notice;
mod path;

pub use entity::{Entity, EntityBrief};
pub use error::SyncError;
pub use notice::InvalidationNotice;
pub use path::EntityPath;

/// Result type for store, bus and client operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Collection name served by the REST layer and used as the bootstrap path
pub const SENSORS: &str = "sensors";
