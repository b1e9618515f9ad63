//! steemwatch-ws — the WebSocket RPC session.
//!
//! # Features
//! - Request/response correlation by id over one multiplexed connection
//! - Fixed-interval reconnect that fails every in-flight call on disconnect
//! - Push-notification dispatch on a dedicated task, in wire order
//! - `on_connect` hook to re-establish subscriptions after a reconnect

pub mod notifications;
pub mod session;

pub use notifications::NotificationRegistry;
pub use session::{ConnectionState, OnConnect, WsSession, WsSessionConfig};
