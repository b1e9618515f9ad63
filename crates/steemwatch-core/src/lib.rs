//! steemwatch-core — foundation types for SteemWatch.
//!
//! # Overview
//!
//! SteemWatch consumes a Steem node's JSON-RPC API over a single websocket
//! and turns it into ordered streams of blocks and account history. The
//! core crate defines:
//!
//! - [`RpcClient`]: the call/notification surface every session implements
//! - [`CallRequest`] / [`Incoming`]: wire types
//! - [`TransportError`]: structured error type
//! - [`api`] module: the dynamic API proxy and typed accessors

pub mod api;
pub mod error;
pub mod request;
pub mod transport;

pub use api::{ApiHandle, BlockInfoApi, CallArgs, DatabaseApi, DynamicGlobalProperties};
pub use error::TransportError;
pub use request::{CallRequest, Incoming};
pub use transport::{NotificationCallback, RpcClient, SubscriptionId};
