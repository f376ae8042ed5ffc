//! Crate-level error types
//!
//! Channel and registry failures live in [`RelayError`]; everything that can end a session
//! (including transport failures) is folded into [`Error`].

use crate::registry::RelayError;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that terminate a single session or the server
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level failure on the owning connection
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Channel or registry refused the operation
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Malformed request line or FLV framing from the peer
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Publish key rejected by the authorizer
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Peer did not complete the request or header exchange in time
    #[error("timed out waiting for peer")]
    Timeout,

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is a normal way for a session to end
    ///
    /// Preemption and peer hang-ups are expected; they are logged at debug level only.
    pub fn is_benign(&self) -> bool {
        match self {
            Error::Relay(RelayError::StaleGeneration) => true,
            Error::Connection(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
