//! Rate limiting for rendezvous-relay.
//!
//! Provides protection against connection flooding and Join/Leave spam.
//!
//! ## Design Notes
//!
//! Registration messages are limited per [`PeerId`] (the id in the
//! `/introduction/{peerId}` path), new connections are limited globally.
//! Direct-connection payload is never rate limited: once two sockets are
//! piped, bytes flow at whatever rate the sockets allow.
//!
//! Both use the governor crate's rate limiters; the keyed one is backed by
//! DashMap.

use crate::config::{ConfigError, LimitsConfig};
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use rendezvous_types::PeerId;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits Join/Leave messages per peer.
    ///
    /// Configured via `limits.messages_per_minute`.
    message_limiter: Arc<KeyedLimiter<PeerId>>,

    /// Limits new connections across all clients.
    ///
    /// Configured via `limits.connections_per_second`.
    connection_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("message_limiter", &"KeyedLimiter<PeerId>")
            .field("connection_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured quota is zero.
    pub fn new(config: &LimitsConfig) -> Result<Self, ConfigError> {
        let messages_per_minute =
            NonZeroU32::new(config.messages_per_minute).ok_or(ConfigError::Invalid {
                field: "limits.messages_per_minute",
                reason: "must be > 0",
            })?;
        let connections_per_second =
            NonZeroU32::new(config.connections_per_second).ok_or(ConfigError::Invalid {
                field: "limits.connections_per_second",
                reason: "must be > 0",
            })?;

        Ok(Self {
            message_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(messages_per_minute))),
            connection_limiter: Arc::new(RateLimiter::direct(Quota::per_second(
                connections_per_second,
            ))),
        })
    }

    /// Check if a registration message from `peer` is allowed.
    pub fn check_message(&self, peer: &PeerId) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(peer)
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Check if a new connection (either endpoint) is allowed.
    pub fn check_connection(&self) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check()
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Get the number of tracked message keys (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict idle peers from the keyed limiter.
    ///
    /// `retain_recent()` removes entries whose cells have fully recharged.
    /// Called periodically from the maintenance task.
    pub fn shrink(&self) {
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many new connections across all clients.
    ConnectionLimitExceeded,
    /// Too many registration messages from this peer.
    MessageLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLimitExceeded => {
                write!(f, "connection rate limit exceeded")
            }
            Self::MessageLimitExceeded => {
                write!(f, "message rate limit exceeded")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}
