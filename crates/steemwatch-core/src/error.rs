//! Transport-level error types.

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during an RPC session operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening the websocket failed. Retried by the reconnect loop and
    /// never handed to callers.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// The connection dropped (or was never open) before a response arrived.
    #[error("steemd RPC connection closed")]
    ConnectionClosed,

    /// The node answered with an `error` payload, carried verbatim.
    #[error("steemd RPC API returned error: {0}")]
    Rpc(Value),

    /// Unparseable message or notification for an unknown subscription.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Caller misuse of the dynamic API proxy.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Response could not be deserialized into the expected shape.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The session was stopped.
    #[error("session shut down")]
    Shutdown,
}

impl TransportError {
    /// Returns `true` if retrying the same call on a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailure(_) | Self::ConnectionClosed)
    }

    /// Returns `true` if this is a node-side error payload.
    pub fn is_rpc_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TransportError::ConnectionClosed.is_retryable());
        assert!(TransportError::ConnectionFailure("refused".into()).is_retryable());
        assert!(!TransportError::Rpc(Value::Null).is_retryable());
        assert!(!TransportError::Shutdown.is_retryable());
    }

    #[test]
    fn rpc_error_keeps_payload() {
        let payload = serde_json::json!({"code": 1, "message": "unknown key"});
        let err = TransportError::Rpc(payload.clone());
        assert!(err.is_rpc_error());
        match err {
            TransportError::Rpc(p) => assert_eq!(p, payload),
            other => panic!("unexpected {other:?}"),
        }
    }
}
