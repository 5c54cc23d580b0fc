//! Direct sockets to one remote peer.
//!
//! A [`PeerHandle`] maps keys to direct sockets opened through the relay's
//! `/connect/{local}/{remote}/{key}` endpoint. Each socket is served by a
//! pump task that owns the WebSocket; [`DirectSocket`] is a cheap handle to
//! that task.

use crate::client::ClientEvent;
use crate::endpoint::RelayEndpoint;
use futures_util::{SinkExt, StreamExt};
use rendezvous_types::{Key, PeerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests from socket handles to the pump task.
#[derive(Debug)]
enum Outbound {
    Frame(Message),
    Close,
}

/// Handle to one open direct connection.
///
/// Clones share the same connection. Incoming text and binary frames are
/// both delivered as bytes.
#[derive(Clone)]
pub struct DirectSocket {
    peer: PeerId,
    key: Key,
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl std::fmt::Debug for DirectSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectSocket")
            .field("peer", &self.peer)
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DirectSocket {
    /// The remote peer.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// The key this connection was opened for.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Send a binary frame.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), crate::ClientError> {
        self.push(Outbound::Frame(Message::Binary(data.into())))
    }

    /// Send a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), crate::ClientError> {
        self.push(Outbound::Frame(Message::Text(text.into())))
    }

    /// Receive the next frame's payload. `None` once the connection closed
    /// and every received frame was read.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.inbound.lock().await.recv().await
    }

    /// Close the connection. Does nothing if already closed.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Whether the pump task has stopped.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    fn push(&self, outbound: Outbound) -> Result<(), crate::ClientError> {
        self.outbound
            .send(outbound)
            .map_err(|_| crate::ClientError::Closed)
    }

    fn same_connection(&self, other: &DirectSocket) -> bool {
        self.outbound.same_channel(&other.outbound)
    }
}

/// State of one key's connection.
#[derive(Debug)]
enum Slot {
    /// Connect in flight, tagged with its attempt number.
    Opening(u64),
    Open(DirectSocket),
}

/// Direct sockets to one remote peer, keyed by shared key.
pub struct PeerHandle {
    local: PeerId,
    remote: PeerId,
    endpoint: RelayEndpoint,
    slots: Mutex<HashMap<Key, Slot>>,
    next_attempt: AtomicU64,
    closed: AtomicBool,
    events: broadcast::Sender<ClientEvent>,
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}

impl PeerHandle {
    pub(crate) fn new(
        local: PeerId,
        remote: PeerId,
        endpoint: RelayEndpoint,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            local,
            remote,
            endpoint,
            slots: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            events,
        }
    }

    /// The remote peer.
    pub fn id(&self) -> &PeerId {
        &self.remote
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Key, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a direct connection for `key` unless one is open or opening.
    ///
    /// Returns `true` if a new connection attempt started. A
    /// [`ClientEvent::Peer`] follows once the socket is open.
    pub fn add(self: &Arc<Self>, key: Key) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        {
            let mut slots = self.slots();
            if slots.contains_key(&key) {
                return false;
            }
            slots.insert(key.clone(), Slot::Opening(attempt));
        }

        let handle = Arc::clone(self);
        tokio::spawn(async move { handle.open(key, attempt).await });
        true
    }

    /// Whether `key` is open or opening.
    pub fn has(&self, key: &Key) -> bool {
        self.slots().contains_key(key)
    }

    /// The open socket for `key`.
    pub fn get(&self, key: &Key) -> Option<DirectSocket> {
        match self.slots().get(key) {
            Some(Slot::Open(socket)) => Some(socket.clone()),
            _ => None,
        }
    }

    /// Close and forget the connection for `key`.
    ///
    /// Returns `false` if there was none. An attempt still in flight is
    /// abandoned when it completes.
    pub fn close(&self, key: &Key) -> bool {
        match self.slots().remove(key) {
            Some(Slot::Open(socket)) => {
                socket.close();
                true
            }
            Some(Slot::Opening(_)) => true,
            None => false,
        }
    }

    /// Keys that are open or opening, sorted.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.slots().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Close every connection and refuse new ones.
    pub(crate) fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<Slot> = self.slots().drain().map(|(_, slot)| slot).collect();
        for slot in drained {
            if let Slot::Open(socket) = slot {
                socket.close();
            }
        }
    }

    async fn open(self: Arc<Self>, key: Key, attempt: u64) {
        let url = self.endpoint.connect(&self.local, &self.remote, &key);
        let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                tracing::warn!("Direct connection to {} for {} failed: {}", self.remote, key, e);
                let mut slots = self.slots();
                if matches!(slots.get(&key), Some(Slot::Opening(a)) if *a == attempt) {
                    slots.remove(&key);
                }
                return;
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let socket = DirectSocket {
            peer: self.remote.clone(),
            key: key.clone(),
            outbound: outbound_tx,
            inbound: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
        };

        let claimed = {
            let mut slots = self.slots();
            let current = matches!(slots.get(&key), Some(Slot::Opening(a)) if *a == attempt);
            if current {
                slots.insert(key.clone(), Slot::Open(socket.clone()));
            }
            current
        };
        if !claimed {
            tracing::debug!("Direct connection {} to {} closed while opening", key, self.remote);
            let mut ws = ws;
            let _ = ws.close(None).await;
            return;
        }

        tracing::debug!("Direct connection {} to {} open", key, self.remote);
        let _ = self.events.send(ClientEvent::Peer {
            peer: self.remote.clone(),
            key: key.clone(),
            socket: socket.clone(),
        });

        pump(ws, outbound_rx, inbound_tx).await;

        {
            let mut slots = self.slots();
            if matches!(slots.get(&key), Some(Slot::Open(s)) if s.same_connection(&socket)) {
                slots.remove(&key);
            }
        }
        tracing::debug!("Direct connection {} to {} closed", key, self.remote);
        let _ = self.events.send(ClientEvent::PeerClosed {
            peer: self.remote.clone(),
            key,
        });
    }
}

/// Move frames between the WebSocket and its handles until either side stops.
async fn pump(
    ws: Ws,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(Outbound::Frame(msg)) => {
                    if ws_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) | None => break,
            },
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound.send(text.into_bytes());
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = inbound.send(data);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Direct connection read failed: {}", e);
                    break;
                }
            },
        }
    }

    // Stop accepting sends before the socket goes away
    outbound.close();
    let _ = ws_tx.close().await;
}
