//! Error taxonomy shared by server and client

use thiserror::Error;

/// Errors raised by the store, the bus, and the client side.
///
/// None of these are fatal to the process: `NotFound` and `Validation` are
/// surfaced to REST callers, `Transport` is isolated to one session or one
/// client connection, and `Protocol` only drops the offending frame.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("entity '{id}' not found")]
    NotFound { id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn not_found(id: impl Into<String>) -> Self {
        SyncError::NotFound { id: id.into() }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        SyncError::Transport(err.to_string())
    }
}
