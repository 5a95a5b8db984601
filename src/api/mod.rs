//! API module for HTTP and WebSocket endpoints
//!
//! This module provides the REST read-back endpoints and the WebSocket
//! invalidation channel.

pub mod http;
pub mod rest;
pub mod websocket;
