//! # rendezvous-relay
//!
//! In-memory rendezvous relay for peers that cannot reach each other directly.
//!
//! This crate implements a relay server that:
//! - Tracks which keys each connected peer is interested in
//! - Introduces peers sharing a key to each other with `Connect` messages
//! - Matches the two sides of a direct connection and pipes bytes between them
//! - Buffers whatever the first side sends until the second side arrives
//!
//! ## Architecture
//!
//! ```text
//! Peer A ──┐  /introduction/A      /introduction/B  ┌── Peer B
//!          │   Join{doc}  ──►         ◄── Join{doc}  │
//!          │   ◄── Connect{B}         Connect{A} ──► │
//!      ┌───┴─────────────────────────────────────────┴───┐
//!      │                rendezvous-relay                 │
//!      │  PeerRegistry ─► IntroductionService            │
//!      │  ConnectionBroker (pending table, pipes)        │
//!      └───┬─────────────────────────────────────────┬───┘
//!          │   /connect/A/B/doc  ◄═══ bytes ═══►  /connect/B/A/doc
//! ```
//!
//! ## Endpoints
//!
//! - `/introduction/{peerId}` (WebSocket): Join/Leave in, Connect out
//! - `/connect/{local}/{remote}/{key}` (WebSocket): opaque frames
//! - `/health`, `/metrics` (HTTP)
//!
//! All state is in memory and lost on restart.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod config;
pub mod error;
pub mod http;
pub mod introduction;
pub mod limits;
pub mod maintenance;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
