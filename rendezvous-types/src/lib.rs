//! # rendezvous-types
//!
//! Wire format types for the rendezvous relay protocol.
//!
//! This crate provides the foundational types used across all rendezvous crates:
//! - [`PeerId`], [`Key`] - Opaque identity and interest-key types
//! - [`PairKey`] - Canonical identity of a direct connection between two peers
//! - [`ClientMessage`], [`ServerMessage`] - Registration protocol messages
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;

pub use error::WireError;
pub use ids::{Key, PairKey, PeerId};
pub use messages::{ClientMessage, Connect, Join, Leave, MessageType, ServerMessage};
