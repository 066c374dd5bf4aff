//! Error types for bus operations.

use designer_types::DecodeError;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors surfaced by the messaging client layer.
///
/// Each kind is distinct so the collaborator can render "unreachable",
/// "not connected yet", "no answer" and "bad answer" differently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Bus unreachable or connect rejected.
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    /// Publish or subscribe attempted without an active connection.
    #[error("Not connected (connection is {state})")]
    NotConnected { state: ConnectionState },

    /// No reply arrived within the configured window.
    #[error("No reply on {subject} within {timeout_ms}ms")]
    Timeout { subject: String, timeout_ms: u64 },

    /// Reply payload did not match the expected schema.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Request payload could not be encoded.
    #[error("Failed to encode request: {0}")]
    Encode(String),

    /// Subject or filter violates the subject grammar.
    #[error("Invalid subject: {0:?}")]
    InvalidSubject(String),

    /// The underlying client failed after the connection was established.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection was closed, or lost while a request was waiting.
    #[error("Connection closed")]
    Closed,
}

impl BusError {
    /// Whether retrying the same operation later can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::NotConnected { .. } | Self::Timeout { .. }
        )
    }
}
