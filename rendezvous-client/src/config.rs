//! Client configuration.

use crate::endpoint::RelayEndpoint;
use crate::error::ClientError;
use rendezvous_core::BackoffConfig;
use rendezvous_types::PeerId;

/// Configuration for [`RelayClient`](crate::RelayClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay base URL, e.g. `ws://127.0.0.1:8080`.
    pub relay_url: String,
    /// This client's id. Defaults to a random id.
    pub peer_id: PeerId,
    /// Reconnect delays for the registration connection.
    pub backoff: BackoffConfig,
    /// Events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Configuration for `relay_url` with a random peer id.
    pub fn new(relay_url: &str) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            peer_id: PeerId::random(),
            backoff: BackoffConfig::default(),
            event_capacity: 256,
        }
    }

    /// Use a fixed peer id.
    pub fn with_peer_id(mut self, peer_id: impl Into<PeerId>) -> Self {
        self.peer_id = peer_id.into();
        self
    }

    /// Set the reconnect backoff.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Check every field, returning the parsed relay endpoint.
    pub fn validate(&self) -> Result<RelayEndpoint, ClientError> {
        self.backoff.validate()?;
        if self.event_capacity == 0 {
            return Err(ClientError::ZeroEventCapacity);
        }
        RelayEndpoint::parse(&self.relay_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults() {
        let config = ClientConfig::new("ws://127.0.0.1:8080");
        assert_eq!(config.backoff, BackoffConfig::default());
        assert_eq!(config.peer_id.as_str().len(), 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_sets_fields() {
        let config = ClientConfig::new("ws://relay")
            .with_peer_id("local-1")
            .with_backoff(BackoffConfig::default().with_max_delay(Duration::from_secs(30)))
            .with_event_capacity(8);
        assert_eq!(config.peer_id, PeerId::from("local-1"));
        assert_eq!(config.backoff.max_delay, Some(Duration::from_secs(30)));
        assert_eq!(config.event_capacity, 8);
    }

    #[test]
    fn invalid_fields_rejected() {
        assert!(matches!(
            ClientConfig::new("ws://relay").with_event_capacity(0).validate(),
            Err(ClientError::ZeroEventCapacity)
        ));
        assert!(matches!(
            ClientConfig::new("ftp://relay").validate(),
            Err(ClientError::InvalidUrl { .. })
        ));
        let bad_backoff = BackoffConfig::default().with_initial_delay(Duration::ZERO);
        assert!(matches!(
            ClientConfig::new("ws://relay").with_backoff(bad_backoff).validate(),
            Err(ClientError::Backoff(_))
        ));
    }
}
