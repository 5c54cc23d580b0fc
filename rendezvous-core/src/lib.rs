//! # rendezvous-core
//!
//! Pure logic for the rendezvous relay (no I/O, instant tests).
//!
//! This crate implements the algorithms and state machines shared by the
//! relay and its clients without any network I/O:
//! - [`interest`] - merging interest sets and intersecting them
//! - [`backoff`] - randomized exponential reconnect delays
//! - [`state`] - the client registration state machine
//!
//! The actual I/O (WebSocket connections, timers) is performed by
//! `rendezvous-client` and `rendezvous-relay`, which interpret the actions
//! produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod interest;
pub mod state;

pub use backoff::{Backoff, BackoffConfig, BackoffError};
pub use interest::{intersection, merge_keys, InterestSet};
pub use state::{Action, Event, RegistrationMachine, RegistrationState};
