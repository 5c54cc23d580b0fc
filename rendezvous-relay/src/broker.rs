//! Connection broker: matches and pipes direct connections.
//!
//! A direct connection is identified by its [`PairKey`]. The first side to
//! arrive parks in the pending table and buffers every frame it sends; the
//! second side takes the parked slot, receives the buffer in arrival order and
//! is then piped to the first, frame for frame, in both directions.
//!
//! The pending socket and its buffer live in the first arrival's task. The
//! table only holds the handoff slot through which the second arrival passes
//! its socket, so the lock is never held across an await.

use crate::server::{self, RelayEvent, RelayMetrics};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rendezvous_types::PairKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, oneshot, watch};

/// Handoff slot for a parked connection.
#[derive(Debug)]
struct Pending<S> {
    id: u64,
    handoff: oneshot::Sender<S>,
}

/// Result of [`PendingTable::claim`].
#[derive(Debug)]
pub enum Claim<S> {
    /// A parked partner existed and now owns the socket.
    Matched,
    /// No partner yet: the caller keeps the socket and waits on `partner`.
    Waiting {
        /// Pass back to [`PendingTable::abandon`].
        id: u64,
        /// The caller's own socket, returned unchanged.
        socket: S,
        /// Resolves with the partner's socket when it arrives.
        partner: oneshot::Receiver<S>,
    },
}

/// Parked connections keyed by pair.
#[derive(Debug)]
pub struct PendingTable<S> {
    slots: Mutex<HashMap<PairKey, Pending<S>>>,
    next_id: AtomicU64,
}

impl<S> Default for PendingTable<S> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<S> PendingTable<S> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<PairKey, Pending<S>>> {
        // Critical sections never panic midway, so a poisoned map is still consistent
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hand `socket` to the parked side of `pair`, or park it.
    ///
    /// If the parked side already went away without abandoning its slot, the
    /// socket is parked in its place.
    pub fn claim(&self, pair: &PairKey, socket: S) -> Claim<S> {
        let mut slots = self.slots();
        let mut socket = socket;

        if let Some(parked) = slots.remove(pair) {
            match parked.handoff.send(socket) {
                Ok(()) => return Claim::Matched,
                Err(returned) => socket = returned,
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (handoff, partner) = oneshot::channel();
        slots.insert(pair.clone(), Pending { id, handoff });

        Claim::Waiting {
            id,
            socket,
            partner,
        }
    }

    /// Remove the slot parked under `id`.
    ///
    /// Returns `false` if a partner already claimed it; the partner's socket
    /// is then waiting in the receiver returned by `claim`.
    pub fn abandon(&self, pair: &PairKey, id: u64) -> bool {
        let mut slots = self.slots();
        match slots.get(pair) {
            Some(parked) if parked.id == id => {
                slots.remove(pair);
                true
            }
            _ => false,
        }
    }

    /// Number of parked connections.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    /// Whether nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    /// Drop every slot. Parked connections see their partner channel close.
    pub fn clear(&self) {
        self.slots().clear();
    }
}

/// How a parked connection stopped waiting.
enum Wait {
    Matched(WebSocket),
    Closed,
}

/// Matches and pipes direct WebSocket connections.
pub struct ConnectionBroker {
    pending: PendingTable<WebSocket>,
    events: broadcast::Sender<RelayEvent>,
    metrics: Arc<RelayMetrics>,
}

impl std::fmt::Debug for ConnectionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBroker")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionBroker {
    /// Create a broker publishing to `events`.
    pub fn new(events: broadcast::Sender<RelayEvent>, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            pending: PendingTable::new(),
            events,
            metrics,
        }
    }

    /// Number of connections waiting for a partner.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop every parked connection.
    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Accept one side of a direct connection.
    ///
    /// Returns once the socket is handed to a parked partner, or once the
    /// parked socket's pairing (and pipe, if any) has finished.
    pub async fn accept(&self, socket: WebSocket, pair: PairKey, mut shutdown: watch::Receiver<bool>) {
        if server::is_stopped(&mut shutdown) {
            tracing::debug!("Relay stopping, refusing {}", pair);
            let _ = socket.close().await;
            return;
        }

        let (id, mut socket, mut partner) = match self.pending.claim(&pair, socket) {
            Claim::Matched => {
                tracing::debug!("Pair {} matched", pair);
                return;
            }
            Claim::Waiting {
                id,
                socket,
                partner,
            } => (id, socket, partner),
        };

        tracing::debug!("Pair {} pending", pair);
        let _ = self.events.send(RelayEvent::PairPending(pair.clone()));

        let mut buffer: Vec<Message> = Vec::new();
        let outcome = loop {
            tokio::select! {
                handoff = &mut partner => match handoff {
                    Ok(other) => break Wait::Matched(other),
                    // Table cleared on shutdown
                    Err(_) => break Wait::Closed,
                },
                frame = socket.recv() => match frame {
                    Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => buffer.push(msg),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break Wait::Closed,
                    Some(Ok(_)) => {}
                },
                _ = shutdown.changed() => break Wait::Closed,
            }
        };

        match outcome {
            Wait::Matched(other) => {
                self.establish(&pair, socket, other, buffer, shutdown).await;
            }
            Wait::Closed => {
                if self.pending.abandon(&pair, id) {
                    tracing::debug!(
                        "Pending {} closed before a partner arrived, dropping {} buffered frames",
                        pair,
                        buffer.len()
                    );
                    self.metrics
                        .pending_orphaned_total
                        .fetch_add(1, Ordering::Relaxed);
                    let _ = self.events.send(RelayEvent::PairClosed(pair.clone()));
                } else if let Ok(mut other) = partner.try_recv() {
                    // Partner claimed the slot while this side was closing
                    for msg in buffer {
                        if other.send(msg).await.is_err() {
                            break;
                        }
                    }
                    let _ = other.close().await;
                    let _ = self.events.send(RelayEvent::PairClosed(pair.clone()));
                }
                let _ = socket.close().await;
            }
        }
    }

    /// Flush the parked side's buffer to the arriving side, then pipe.
    async fn establish(
        &self,
        pair: &PairKey,
        parked: WebSocket,
        mut arrived: WebSocket,
        buffer: Vec<Message>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.metrics
            .pairs_established_total
            .fetch_add(1, Ordering::Relaxed);
        self.metrics.pairs_active.fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(RelayEvent::PairEstablished(pair.clone()));
        tracing::debug!("Pair {} established, replaying {} frames", pair, buffer.len());

        let mut flushed = true;
        for msg in buffer {
            self.metrics
                .bytes_piped_total
                .fetch_add(frame_len(&msg), Ordering::Relaxed);
            if arrived.send(msg).await.is_err() {
                flushed = false;
                break;
            }
        }

        let (mut parked_tx, mut parked_rx) = parked.split();
        let (mut arrived_tx, mut arrived_rx) = arrived.split();

        if flushed {
            tokio::select! {
                _ = forward(&mut parked_rx, &mut arrived_tx, &self.metrics) => {}
                _ = forward(&mut arrived_rx, &mut parked_tx, &self.metrics) => {}
                _ = shutdown.changed() => {}
            }
        }

        let _ = parked_tx.close().await;
        let _ = arrived_tx.close().await;

        self.metrics.pairs_active.fetch_sub(1, Ordering::Relaxed);
        let _ = self.events.send(RelayEvent::PairClosed(pair.clone()));
        tracing::debug!("Pair {} closed", pair);
    }
}

/// Copy data frames from `from` to `to` until either side stops.
async fn forward(
    from: &mut SplitStream<WebSocket>,
    to: &mut SplitSink<WebSocket, Message>,
    metrics: &RelayMetrics,
) {
    while let Some(frame) = from.next().await {
        let msg = match frame {
            Ok(msg @ (Message::Text(_) | Message::Binary(_))) => msg,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Pipe read ended: {}", e);
                break;
            }
        };
        metrics
            .bytes_piped_total
            .fetch_add(frame_len(&msg), Ordering::Relaxed);
        if to.send(msg).await.is_err() {
            break;
        }
    }
}

fn frame_len(msg: &Message) -> u64 {
    match msg {
        Message::Text(text) => text.len() as u64,
        Message::Binary(data) => data.len() as u64,
        _ => 0,
    }
}
