//! Registration protocol messages.
//!
//! These travel as JSON text frames over the `/introduction/{peerId}`
//! connection. Every message carries a `type` discriminator:
//!
//! ```text
//! client → relay   {"type":"Join","id":"<peer>","join":["<key>", ...]}
//! client → relay   {"type":"Leave","id":"<peer>","leave":["<key>", ...]}
//! relay  → client  {"type":"Connect","id":"<other peer>","keys":["<key>", ...]}
//! ```
//!
//! The Connect message always uses `id` / `keys`. The older `peerId` /
//! `peerChannels` spelling is not accepted.

use serde::{Deserialize, Serialize};

use crate::{Key, PeerId, WireError};

/// Message type discriminator, for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client announces interest in keys
    Join,
    /// Client retracts interest in keys
    Leave,
    /// Relay introduces another peer
    Connect,
}

impl MessageType {
    /// The wire name of this message type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "Join",
            Self::Leave => "Leave",
            Self::Connect => "Connect",
        }
    }
}

/// Messages sent by a client over its registration connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Add keys to the sender's interest set
    Join(Join),
    /// Remove keys from the sender's interest set
    Leave(Leave),
}

impl ClientMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::Deserialization)
    }

    /// The id the sender claims in the message body.
    pub fn sender(&self) -> &PeerId {
        match self {
            Self::Join(join) => &join.id,
            Self::Leave(leave) => &leave.id,
        }
    }

    /// The discriminator of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Join(_) => MessageType::Join,
            Self::Leave(_) => MessageType::Leave,
        }
    }
}

/// Messages sent by the relay over a registration connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Introduction to a peer with shared interest
    Connect(Connect),
}

impl ServerMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::Deserialization)
    }

    /// The discriminator of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Connect(_) => MessageType::Connect,
        }
    }
}

/// Join one or more keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    /// Sending peer
    pub id: PeerId,
    /// Keys to add
    pub join: Vec<Key>,
}

/// Leave one or more keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leave {
    /// Sending peer
    pub id: PeerId,
    /// Keys to remove
    pub leave: Vec<Key>,
}

/// Introduction: another peer shares interest in `keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connect {
    /// The other peer
    pub id: PeerId,
    /// Keys both peers hold
    pub keys: Vec<Key>,
}
