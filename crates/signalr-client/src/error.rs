//! Error types for the connection layer.

use thiserror::Error;

/// The result type used throughout the crate.
pub type SignalrResult<T> = Result<T, SignalrError>;

/// Failures surfaced by the connection and its collaborators.
///
/// The `Display` output of `ProtocolError`, `TransportError` and
/// `InvalidState` is the bare message so that callers (and log entries) see
/// the failure reason without an extra prefix.
#[derive(Error, Debug)]
pub enum SignalrError {
    /// An operation was attempted while the connection was in the wrong
    /// state.
    #[error("{message}")]
    InvalidState { message: String },

    /// An HTTP call returned a non-2xx status.
    #[error("web exception - {status} {reason}")]
    WebError { status: u16, reason: String },

    /// The negotiation sub-protocol was violated: legacy server detected, no
    /// WebSockets transport offered, redirect limit exceeded, malformed
    /// payload, or a handshake timeout.
    #[error("{message}")]
    ProtocolError { message: String },

    /// The underlying transport failed while connecting, sending, receiving
    /// or closing.
    #[error("{message}")]
    TransportError { message: String },

    /// A start was aborted by `stop`, or a stop was superseded by another
    /// stop already in progress.
    #[error("operation canceled")]
    Canceled,
}

impl SignalrError {
    /// Create an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a web error from a status code and reason phrase.
    pub fn web(status: u16, reason: impl Into<String>) -> Self {
        Self::WebError {
            status,
            reason: reason.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportError {
            message: message.into(),
        }
    }
}
