//! RelayClient - the main interface for rendezvous clients.
//!
//! # Architecture
//!
//! RelayClient uses the pure registration state machine (from
//! rendezvous-core) for connection logic. A background task interprets its
//! actions to perform the actual WebSocket I/O.
//!
//! ```text
//! Application → RelayClient ─► RegistrationMachine (rendezvous-core)
//!                   │                  │ actions
//!                   │                  ▼
//!                   │          registration task ─► /introduction/{id}
//!                   ▼                  │ Connect
//!               PeerHandle ◄───────────┘
//!                   └─► /connect/{id}/{remote}/{key}
//! ```
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> Result<(), rendezvous_client::ClientError> {
//! use rendezvous_client::{ClientConfig, ClientEvent, RelayClient};
//!
//! let client = RelayClient::new(ClientConfig::new("ws://127.0.0.1:8080"))?;
//! let mut events = client.subscribe();
//! client.join("doc-42")?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::Peer { socket, .. } = event {
//!         socket.send(b"hello".to_vec())?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::ClientConfig;
use crate::endpoint::RelayEndpoint;
use crate::error::ClientError;
use crate::peer::{DirectSocket, PeerHandle};
use crate::registration;
use rendezvous_core::{Action, Event, RegistrationMachine, RegistrationState};
use rendezvous_types::{Key, PeerId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Observable client activity.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The registration connection changed state.
    StateChanged(RegistrationState),
    /// A direct connection to `peer` for `key` is open.
    Peer {
        /// The remote peer.
        peer: PeerId,
        /// The shared key.
        key: Key,
        /// The open socket.
        socket: DirectSocket,
    },
    /// A direct connection closed.
    PeerClosed {
        /// The remote peer.
        peer: PeerId,
        /// The shared key.
        key: Key,
    },
}

/// State shared by the client handle and its registration task.
pub(crate) struct Shared {
    pub(crate) id: PeerId,
    pub(crate) endpoint: RelayEndpoint,
    machine: Mutex<RegistrationMachine>,
    pub(crate) state: watch::Sender<RegistrationState>,
    peers: Mutex<HashMap<PeerId, Arc<PeerHandle>>>,
    pub(crate) events: broadcast::Sender<ClientEvent>,
}

impl Shared {
    fn machine(&self) -> MutexGuard<'_, RegistrationMachine> {
        self.machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<PeerId, Arc<PeerHandle>>> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Feed an event to the machine and return the resulting actions.
    pub(crate) fn apply(&self, event: Event) -> Vec<Action> {
        self.machine().on_event(event)
    }

    fn is_stopped(&self) -> bool {
        *self.machine().state() == RegistrationState::Stopped
    }

    /// Get or create the handle for `remote`. `None` once stopped.
    pub(crate) fn peer_entry(&self, remote: &PeerId) -> Option<Arc<PeerHandle>> {
        if self.is_stopped() {
            return None;
        }
        let handle = self.peers().entry(remote.clone()).or_insert_with(|| {
            Arc::new(PeerHandle::new(
                self.id.clone(),
                remote.clone(),
                self.endpoint.clone(),
                self.events.clone(),
            ))
        })
        .clone();
        Some(handle)
    }
}

/// Client of a rendezvous relay.
///
/// Registers with the relay as soon as it is created and keeps the
/// registration alive across disconnects, re-announcing every joined key
/// after each reconnect.
pub struct RelayClient {
    shared: Arc<Shared>,
    requests: mpsc::UnboundedSender<Vec<Action>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("id", &self.shared.id)
            .field("relay", &self.shared.endpoint.base().as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RelayClient {
    /// Create a client and start connecting.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let endpoint = config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ClientError::NoRuntime(e.to_string()))?;

        let machine = RegistrationMachine::new(config.peer_id.clone(), config.backoff)?;
        let (state, _) = watch::channel(machine.state().clone());
        let (events, _) = broadcast::channel(config.event_capacity);

        let shared = Arc::new(Shared {
            id: config.peer_id,
            endpoint,
            machine: Mutex::new(machine),
            state,
            peers: Mutex::new(HashMap::new()),
            events,
        });

        let (requests, requests_rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(registration::run(shared.clone(), requests_rx));

        Ok(Self {
            shared,
            requests,
            task: Mutex::new(Some(task)),
        })
    }

    /// This client's peer id.
    pub fn id(&self) -> &PeerId {
        &self.shared.id
    }

    /// Declare interest in `key`.
    ///
    /// Sent immediately when registered, otherwise on the next successful
    /// connection.
    pub fn join(&self, key: impl Into<Key>) -> Result<(), ClientError> {
        self.request(Event::JoinRequested { key: key.into() })
    }

    /// Drop interest in `key`.
    pub fn leave(&self, key: impl Into<Key>) -> Result<(), ClientError> {
        self.request(Event::LeaveRequested { key: key.into() })
    }

    fn request(&self, event: Event) -> Result<(), ClientError> {
        let actions = {
            let mut machine = self.shared.machine();
            if *machine.state() == RegistrationState::Stopped {
                return Err(ClientError::Closed);
            }
            machine.on_event(event)
        };
        if !actions.is_empty() {
            self.requests
                .send(actions)
                .map_err(|_| ClientError::Closed)?;
        }
        Ok(())
    }

    /// Keys currently held, sorted.
    pub fn joined_keys(&self) -> Vec<Key> {
        self.shared.machine().keys().iter().cloned().collect()
    }

    /// Current registration state.
    pub fn state(&self) -> RegistrationState {
        self.shared.state.borrow().clone()
    }

    /// Receiver tracking the registration state.
    pub fn watch_state(&self) -> watch::Receiver<RegistrationState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// The handle for a peer the relay introduced.
    pub fn peer(&self, id: &PeerId) -> Option<Arc<PeerHandle>> {
        self.shared.peers().get(id).cloned()
    }

    /// Every peer the relay has introduced so far.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.shared.peers().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop the registration loop and close every direct socket.
    ///
    /// Safe to call more than once.
    pub async fn close(&self) {
        let actions = self.shared.apply(Event::StopRequested);
        if !actions.is_empty() {
            let _ = self.requests.send(actions);
        }

        let handles: Vec<Arc<PeerHandle>> = self.shared.peers().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.close_all();
        }

        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Registration task failed: {}", e);
            }
        }
    }
}
