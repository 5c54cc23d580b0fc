//! Registration state machine for rendezvous clients.
//!
//! This module provides a pure, side-effect-free state machine for the
//! long-lived registration connection. It takes events as input and produces
//! a list of actions to execute.
//!
//! The actual I/O (connecting, sending messages, sleeping) is performed by
//! `rendezvous-client`, not by this module.
//!
//! ```text
//!            ConnectSucceeded
//! Connecting ────────────────► Open
//!     ▲  │                       │
//!     │  │ ConnectFailed         │ Disconnected
//!     │  ▼                       ▼
//!     └──── Closed { retry_in } ◄┘
//!  RetryTimerFired
//! ```
//!
//! `StopRequested` moves any state to `Stopped`, which ignores everything.

use std::time::Duration;

use rendezvous_types::{ClientMessage, Join, Key, Leave, PeerId};

use crate::backoff::{Backoff, BackoffConfig, BackoffError};
use crate::interest::InterestSet;

/// Observable state of a registration connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    /// A connection attempt is in flight.
    Connecting,
    /// Registered with the relay; keys have been announced.
    Open,
    /// Connection lost or failed; a retry is scheduled.
    Closed {
        /// Delay before the next attempt.
        retry_in: Duration,
    },
    /// Shut down by the owner. Terminal.
    Stopped,
}

impl RegistrationState {
    /// Check if currently registered.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The registration connection was established.
    ConnectSucceeded,
    /// The connection attempt failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// An open connection was lost.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// The retry delay elapsed.
    RetryTimerFired,
    /// The owner wants interest in a key.
    JoinRequested {
        /// Key to join.
        key: Key,
    },
    /// The owner drops interest in a key.
    LeaveRequested {
        /// Key to leave.
        key: Key,
    },
    /// The owner is shutting down.
    StopRequested,
}

/// Instructions for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the registration connection.
    Connect,
    /// Send a message on the open registration connection.
    Send(ClientMessage),
    /// Wait, then feed back [`Event::RetryTimerFired`].
    ScheduleRetry {
        /// How long to wait.
        delay: Duration,
    },
    /// Close the registration connection.
    Disconnect,
    /// Report a state transition to observers.
    StateChanged(RegistrationState),
}

/// The registration state machine plus the locally held key set.
///
/// The key set is the source of truth for what the client wants; the relay's
/// copy is rebuilt from it on every successful connection.
#[derive(Debug, Clone)]
pub struct RegistrationMachine {
    peer_id: PeerId,
    state: RegistrationState,
    keys: InterestSet,
    backoff: Backoff,
}

impl RegistrationMachine {
    /// Create a machine in the `Connecting` state.
    ///
    /// The driver is expected to start connecting immediately.
    pub fn new(peer_id: PeerId, backoff: BackoffConfig) -> Result<Self, BackoffError> {
        Ok(Self {
            peer_id,
            state: RegistrationState::Connecting,
            keys: InterestSet::new(),
            backoff: Backoff::new(backoff)?,
        })
    }

    /// Current state.
    pub fn state(&self) -> &RegistrationState {
        &self.state
    }

    /// Keys currently held.
    pub fn keys(&self) -> &InterestSet {
        &self.keys
    }

    /// Delay the next failure will wait.
    pub fn current_backoff(&self) -> Duration {
        self.backoff.current()
    }

    /// Process an event and return the actions to execute.
    pub fn on_event(&mut self, event: Event) -> Vec<Action> {
        if self.state == RegistrationState::Stopped {
            return vec![];
        }
        let open = self.state.is_open();

        match event {
            Event::StopRequested => {
                self.state = RegistrationState::Stopped;
                vec![
                    Action::Disconnect,
                    Action::StateChanged(RegistrationState::Stopped),
                ]
            }

            // Key changes are recorded in every live state; only Open sends
            Event::JoinRequested { key } => {
                self.keys.insert(key.clone());
                if open {
                    vec![Action::Send(ClientMessage::Join(Join {
                        id: self.peer_id.clone(),
                        join: vec![key],
                    }))]
                } else {
                    vec![]
                }
            }
            Event::LeaveRequested { key } => {
                self.keys.remove(&key);
                if open {
                    vec![Action::Send(ClientMessage::Leave(Leave {
                        id: self.peer_id.clone(),
                        leave: vec![key],
                    }))]
                } else {
                    vec![]
                }
            }

            Event::ConnectSucceeded if self.state == RegistrationState::Connecting => {
                self.state = RegistrationState::Open;
                self.backoff.reset();
                let mut actions = vec![Action::StateChanged(RegistrationState::Open)];
                if !self.keys.is_empty() {
                    actions.push(Action::Send(ClientMessage::Join(Join {
                        id: self.peer_id.clone(),
                        join: self.keys.iter().cloned().collect(),
                    })));
                }
                actions
            }

            Event::ConnectFailed { .. } if self.state == RegistrationState::Connecting => {
                self.schedule_retry()
            }
            Event::Disconnected { .. } if open => self.schedule_retry(),

            Event::RetryTimerFired if matches!(self.state, RegistrationState::Closed { .. }) => {
                self.state = RegistrationState::Connecting;
                vec![
                    Action::StateChanged(RegistrationState::Connecting),
                    Action::Connect,
                ]
            }

            // Invalid transitions - stay in current state
            _ => vec![],
        }
    }

    fn schedule_retry(&mut self) -> Vec<Action> {
        let delay = self.backoff.next_delay();
        let closed = RegistrationState::Closed { retry_in: delay };
        self.state = closed.clone();
        vec![
            Action::StateChanged(closed),
            Action::ScheduleRetry { delay },
        ]
    }
}
