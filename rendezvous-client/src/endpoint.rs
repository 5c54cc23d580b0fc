//! Relay endpoint URLs.
//!
//! Ids and keys are opaque strings, so they are appended as percent-encoded
//! path segments rather than formatted into the path.

use crate::error::ClientError;
use rendezvous_types::{Key, PeerId};
use url::Url;

/// Base URL of a relay (`ws://host:port`, optionally with a path prefix).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    base: Url,
}

impl RelayEndpoint {
    /// Parse and check a relay base URL.
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let base = Url::parse(raw).map_err(|e| ClientError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl {
                url: raw.to_string(),
                reason: "cannot carry a path".to_string(),
            });
        }
        if !matches!(base.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme {:?}", base.scheme()),
            });
        }
        Ok(Self { base })
    }

    /// The base URL.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `{base}/introduction/{peer}`
    pub fn introduction(&self, peer: &PeerId) -> Url {
        self.with_segments(&["introduction", peer.as_str()])
    }

    /// `{base}/connect/{local}/{remote}/{key}`
    pub fn connect(&self, local: &PeerId, remote: &PeerId, key: &Key) -> Url {
        self.with_segments(&["connect", local.as_str(), remote.as_str(), key.as_str()])
    }

    fn with_segments(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}
