//! # rendezvous-client
//!
//! Client library for the rendezvous relay.
//!
//! A [`RelayClient`] keeps a registration connection open to the relay's
//! `/introduction/{id}` endpoint, announcing the keys it is interested in.
//! Whenever the relay introduces another peer sharing a key, the client opens
//! a direct socket for that key through `/connect/{id}/{remote}/{key}` and
//! reports it as a [`ClientEvent::Peer`].
//!
//! ## Features
//!
//! - **Automatic reconnect**: jittered exponential backoff, keys re-announced
//! - **Pure State Machine**: uses rendezvous-core for side-effect-free logic
//! - **Per-key sockets**: at most one direct socket per (peer, key)
//!
//! ## Example
//!
//! ```no_run
//! # async fn run() -> Result<(), rendezvous_client::ClientError> {
//! use rendezvous_client::{ClientConfig, RelayClient};
//!
//! let client = RelayClient::new(ClientConfig::new("ws://127.0.0.1:8080").with_peer_id("local-1"))?;
//! client.join("doc-42")?;
//! # client.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod peer;
mod registration;

pub use client::{ClientEvent, RelayClient};
pub use config::ClientConfig;
pub use endpoint::RelayEndpoint;
pub use error::ClientError;
pub use peer::{DirectSocket, PeerHandle};
pub use rendezvous_core::{BackoffConfig, RegistrationState};
pub use rendezvous_types::{Key, PeerId};
