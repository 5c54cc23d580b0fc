//! Error types for the rendezvous wire format.

use thiserror::Error;

/// Errors that can occur encoding or decoding registration messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed (malformed envelope)
    #[error("malformed message: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Message exceeds the configured frame limit
    #[error("message too large: {size} bytes (limit: {limit} bytes)")]
    TooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Maximum accepted size.
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::TooLarge {
            size: 2048,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "message too large: 2048 bytes (limit: 1024 bytes)"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
