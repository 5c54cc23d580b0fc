//! Registered peers and their declared interest.
//!
//! One entry per peer id. Each entry owns the sending half of the channel
//! feeding that peer's registration socket, tagged with a session number so
//! a stale connection cannot remove the entry of the connection that
//! replaced it.

use dashmap::DashMap;
use rendezvous_core::{intersection, merge_keys, InterestSet};
use rendezvous_types::{Key, PeerId, ServerMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Registry entry for one connected peer.
#[derive(Debug)]
struct PeerEntry {
    session: u64,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    keys: InterestSet,
}

/// Handed to the connection that registered a peer.
#[derive(Debug)]
pub struct Registration {
    /// Session number to pass back to [`PeerRegistry::unregister`].
    pub session: u64,
    /// Messages the relay wants written to this peer's socket.
    ///
    /// Yields `None` once the registration is replaced or cleared.
    pub outbound: mpsc::UnboundedReceiver<ServerMessage>,
}

/// Concurrent map of registered peers.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<PeerId, PeerEntry>,
    next_session: AtomicU64,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer`, replacing any existing registration.
    ///
    /// The replaced entry's sender is dropped, which ends its connection's
    /// outbound stream. The new entry starts with no keys.
    pub fn register(&self, peer: &PeerId) -> Registration {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let previous = self.peers.insert(
            peer.clone(),
            PeerEntry {
                session,
                outbound: tx,
                keys: InterestSet::new(),
            },
        );
        if let Some(old) = previous {
            tracing::info!(
                "Peer {} re-registered, replacing session {} with {}",
                peer,
                old.session,
                session
            );
        }

        Registration {
            session,
            outbound: rx,
        }
    }

    /// Remove `peer` if it is still registered under `session`.
    ///
    /// Returns `false` when the entry was already replaced or removed.
    pub fn unregister(&self, peer: &PeerId, session: u64) -> bool {
        self.peers
            .remove_if(peer, |_, entry| entry.session == session)
            .is_some()
    }

    /// Apply a join/leave delta to `peer`'s keys and return the new set.
    ///
    /// Returns `None` if the peer is not registered.
    pub fn update_interest(&self, peer: &PeerId, join: &[Key], leave: &[Key]) -> Option<InterestSet> {
        let mut entry = self.peers.get_mut(peer)?;
        let merged = merge_keys(&entry.keys, join, leave);
        entry.keys = merged.clone();
        Some(merged)
    }

    /// Every other registered peer sharing at least one key with `keys`,
    /// together with the shared keys.
    ///
    /// This is a full scan of the registry.
    pub fn intersecting_peers(&self, peer: &PeerId, keys: &InterestSet) -> Vec<(PeerId, Vec<Key>)> {
        if keys.is_empty() {
            return Vec::new();
        }
        self.peers
            .iter()
            .filter(|entry| entry.key() != peer)
            .filter_map(|entry| {
                let shared = intersection(keys, &entry.value().keys);
                if shared.is_empty() {
                    None
                } else {
                    Some((entry.key().clone(), shared))
                }
            })
            .collect()
    }

    /// Queue `message` for `peer`'s registration socket.
    ///
    /// Returns `false` if the peer is not registered or its connection has
    /// already gone away; the message is dropped.
    pub fn send(&self, peer: &PeerId, message: ServerMessage) -> bool {
        let Some(entry) = self.peers.get(peer) else {
            tracing::debug!("Dropping {:?} for unregistered peer {}", message, peer);
            return false;
        };
        entry.outbound.send(message).is_ok()
    }

    /// Current keys of `peer`.
    pub fn keys(&self, peer: &PeerId) -> Option<InterestSet> {
        self.peers.get(peer).map(|entry| entry.keys.clone())
    }

    /// Whether `peer` is registered.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peers are registered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drop every registration, ending all outbound streams.
    pub fn clear(&self) {
        self.peers.clear();
    }
}
