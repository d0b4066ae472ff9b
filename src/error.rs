//! Error types for the h2mux crate.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a multiplexed connection.
///
/// Variants carry owned strings so that a fatal connection error can be
/// stored as the completion value of every pending request and handed out to
/// each awaiting caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Transport-level failure: connect, send, or receive. Fatal to the
    /// connection that raised it.
    #[error("transport error: {0}")]
    Transport(String),

    /// The protocol engine rejected input, or an inbound event referenced an
    /// unknown stream. Fatal to the connection: shared engine state can no
    /// longer be trusted.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON body encoding failed.
    #[error("JSON error: {0}")]
    Json(String),
}

impl Error {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}
