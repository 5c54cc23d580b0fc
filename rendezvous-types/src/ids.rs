//! Identity types for the rendezvous protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a process instance connected to the relay.
///
/// Opaque to the relay. Clients that do not bring their own identity use
/// [`PeerId::random`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a PeerId from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a new random PeerId (UUID v4, simple form).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get the string form of this PeerId.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

/// A channel of mutual interest (document id, discovery key, ...).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Create a Key from any string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the string form of this Key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

/// Canonical identity of a direct connection between two peers on one key.
///
/// Both sides of a pair name it from their own point of view
/// (`local`, `remote`, `key`). The canonical form orders the two peer ids
/// byte-wise, so `PairKey::new(a, b, k) == PairKey::new(b, a, k)`. The relay
/// matches direct sockets on this value and nothing else.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    low: PeerId,
    high: PeerId,
    key: Key,
}

impl PairKey {
    /// Canonicalize a (local, remote, key) triple.
    pub fn new(local: PeerId, remote: PeerId, key: Key) -> Self {
        if local <= remote {
            Self {
                low: local,
                high: remote,
                key,
            }
        } else {
            Self {
                low: remote,
                high: local,
                key,
            }
        }
    }

    /// The lexicographically smaller peer id.
    pub fn low(&self) -> &PeerId {
        &self.low
    }

    /// The lexicographically larger peer id.
    pub fn high(&self) -> &PeerId {
        &self.high
    }

    /// The shared key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Whether `peer` is one of the two sides.
    pub fn involves(&self, peer: &PeerId) -> bool {
        &self.low == peer || &self.high == peer
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}#{}", self.low, self.high, self.key)
    }
}

impl fmt::Debug for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairKey({})", self)
    }
}
