//! Error types for cellwire-client.

use thiserror::Error;

use crate::session::ConnectionPhase;

/// Main error type for all cellwire operations.
///
/// Only caller misuse ever reaches a collaborator through a public client
/// method. Transport and decode failures are absorbed by the session and
/// surface as [`ClientEvent`](crate::ClientEvent)s instead.
#[derive(Debug, Error)]
pub enum CellwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation is not valid in the current connection phase.
    #[error("cannot {operation} while {phase}")]
    InvalidPhase {
        phase: ConnectionPhase,
        operation: &'static str,
    },

    /// A string destined for the wire contains a line terminator.
    #[error("{field} must not contain a newline")]
    EmbeddedNewline { field: &'static str },

    /// Host name could not be turned into a usable address.
    #[error("could not resolve host: {0}")]
    Resolve(String),

    /// Connect attempt did not finish within the configured timeout.
    #[error("Connection timed out")]
    ConnectTimeout,

    /// A receive is already pending on this socket.
    #[error("a receive is already in flight on this connection")]
    ReceiveInFlight,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The client was built outside of a tokio runtime.
    #[error("no tokio runtime available; build the client inside a runtime or pass one")]
    NoRuntime,
}

/// Result type alias using CellwireError.
pub type Result<T> = std::result::Result<T, CellwireError>;
