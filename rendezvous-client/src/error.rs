//! Client errors.

use rendezvous_core::BackoffError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The relay URL cannot carry endpoint paths.
    #[error("invalid relay url {url:?}: {reason}")]
    InvalidUrl {
        /// The URL as given.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Backoff parameters rejected.
    #[error("invalid backoff configuration: {0}")]
    Backoff(#[from] BackoffError),

    /// Event channel capacity must be non-zero.
    #[error("event capacity must be greater than zero")]
    ZeroEventCapacity,

    /// The client or socket has been closed.
    #[error("closed")]
    Closed,

    /// Operation needs a Tokio runtime.
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ClientError::InvalidUrl {
            url: "mailto:x".to_string(),
            reason: "cannot be a base".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid relay url \"mailto:x\": cannot be a base"
        );
        assert_eq!(ClientError::Closed.to_string(), "closed");
    }

    #[test]
    fn backoff_error_converts() {
        let err: ClientError = BackoffError::ZeroInitialDelay.into();
        assert!(matches!(err, ClientError::Backoff(_)));
    }
}
