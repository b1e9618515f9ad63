//! Error types for block and history streams.

use thiserror::Error;

use steemwatch_core::TransportError;

/// Errors surfaced to stream consumers.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The node answered with data the stream cannot make sense of.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A wait was cancelled through its cancellation token.
    #[error("wait cancelled")]
    Cancelled,
}

impl StreamError {
    /// Returns `true` if the underlying connection dropped mid-call.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::Transport(TransportError::ConnectionClosed))
    }
}
