//! The `RpcClient` trait: the surface every session exposes to consumers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

/// Identifier of a notification subscription, allocated client-side and
/// handed to the node as a push target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl From<u64> for SubscriptionId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback invoked with a push notification's parameters.
///
/// Runs on the session's dispatcher task, never on the read loop, so it
/// may be slow without stalling reads. Callbacks are invoked in wire order.
pub type NotificationCallback = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Call and notification primitives of an RPC session.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn RpcClient>`.
#[async_trait]
pub trait RpcClient: Send + Sync + 'static {
    /// Invoke `api.method(args)` and return the `result` field.
    ///
    /// Fails with [`TransportError::Rpc`] when the node answers with an
    /// `error` payload and [`TransportError::ConnectionClosed`] when the
    /// connection drops first.
    async fn call(&self, api: &str, method: &str, args: Value) -> Result<Value, TransportError>;

    /// Allocate a subscription id bound to `callback`.
    ///
    /// The id only becomes useful once passed to a node method that
    /// registers it as a push target. Subscriptions are dropped on reconnect.
    fn register_notification(&self, callback: NotificationCallback) -> SubscriptionId;

    /// Whether `id` is still registered (it is cleared by every reconnect).
    fn is_registered(&self, id: SubscriptionId) -> bool;

    /// Resolve once `id` is no longer registered, which happens when a
    /// disconnect clears the subscription table.
    async fn subscription_lost(&self, id: SubscriptionId);

    /// Suspend until the client is connected and ready for calls.
    ///
    /// Fails with [`TransportError::Shutdown`] once the client is stopped.
    async fn wait_connected(&self) -> Result<(), TransportError>;

    /// Return the endpoint this client talks to.
    fn url(&self) -> &str;
}
