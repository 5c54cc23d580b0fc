//! Error types for rendezvous-relay.

use rendezvous_types::WireError;

/// Main error type for relay lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The listen address could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// `listen()` was called on a server that is already listening.
    #[error("relay is already listening on {0}")]
    AlreadyListening(std::net::SocketAddr),

    /// `listen()` was called after `close()`.
    #[error("relay has been closed")]
    Closed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors handling a single registration frame.
///
/// None of these close the connection: the frame is logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame did not decode into a known message.
    #[error("malformed message: {0}")]
    Malformed(#[from] WireError),

    /// Binary frame that is not UTF-8 text.
    #[error("registration frames must be UTF-8 JSON text")]
    NotText,

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
