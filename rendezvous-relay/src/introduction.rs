//! Introduction service: turns shared interest into `Connect` messages.
//!
//! Whenever a peer's keys change, every other registered peer sharing at
//! least one key with the new set is introduced to it, in both directions.
//! Peers that intersect are introduced again on every change, not only the
//! first time.

use crate::registry::{PeerRegistry, Registration};
use crate::server::{RelayEvent, RelayMetrics};
use rendezvous_types::{Connect, Key, PeerId, ServerMessage};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One introduction produced by an interest update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Introduction {
    /// The peer whose interest changed.
    pub peer: PeerId,
    /// The other peer.
    pub other: PeerId,
    /// Keys both hold.
    pub keys: Vec<Key>,
}

/// Registry plus the introduction rule.
#[derive(Debug)]
pub struct IntroductionService {
    registry: PeerRegistry,
    events: broadcast::Sender<RelayEvent>,
    metrics: Arc<RelayMetrics>,
}

impl IntroductionService {
    /// Create a service publishing to `events`.
    pub fn new(events: broadcast::Sender<RelayEvent>, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            registry: PeerRegistry::new(),
            events,
            metrics,
        }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Register a newly connected peer.
    pub fn register(&self, peer: &PeerId) -> Registration {
        let registration = self.registry.register(peer);
        self.metrics.registrations_total.fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(RelayEvent::PeerConnected(peer.clone()));
        tracing::info!("Peer {} registered (total: {})", peer, self.registry.len());
        registration
    }

    /// Remove a peer whose registration connection ended.
    ///
    /// Does nothing if `session` was already replaced by a newer connection.
    pub fn unregister(&self, peer: &PeerId, session: u64) {
        if self.registry.unregister(peer, session) {
            let _ = self.events.send(RelayEvent::PeerDisconnected(peer.clone()));
            tracing::info!(
                "Peer {} unregistered (remaining: {})",
                peer,
                self.registry.len()
            );
        } else {
            tracing::debug!("Session {} of {} already replaced", session, peer);
        }
    }

    /// Apply a Join/Leave delta and introduce `peer` to every match.
    ///
    /// Each match receives a `Connect` naming `peer`, and `peer` receives a
    /// `Connect` naming the match. An unregistered `peer` produces nothing.
    pub fn apply_interest(&self, peer: &PeerId, join: &[Key], leave: &[Key]) -> Vec<Introduction> {
        let Some(keys) = self.registry.update_interest(peer, join, leave) else {
            tracing::debug!("Interest update from unregistered peer {}", peer);
            return Vec::new();
        };

        let matches = self.registry.intersecting_peers(peer, &keys);
        let mut introductions = Vec::with_capacity(matches.len());

        for (other, shared) in matches {
            self.registry.send(
                &other,
                ServerMessage::Connect(Connect {
                    id: peer.clone(),
                    keys: shared.clone(),
                }),
            );
            self.registry.send(
                peer,
                ServerMessage::Connect(Connect {
                    id: other.clone(),
                    keys: shared.clone(),
                }),
            );
            self.metrics
                .introductions_total
                .fetch_add(2, Ordering::Relaxed);

            let _ = self.events.send(RelayEvent::Introduced {
                a: peer.clone(),
                b: other.clone(),
                keys: shared.clone(),
            });
            tracing::debug!("Introduced {} <-> {} on {:?}", peer, other, shared);

            introductions.push(Introduction {
                peer: peer.clone(),
                other,
                keys: shared,
            });
        }

        introductions
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registration;

    fn service() -> IntroductionService {
        let (events, _) = broadcast::channel(64);
        IntroductionService::new(events, Arc::new(RelayMetrics::default()))
    }

    fn keys(names: &[&str]) -> Vec<Key> {
        names.iter().map(|n| Key::from(*n)).collect()
    }

    fn drain(reg: &mut Registration) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = reg.outbound.try_recv() {
            out.push(msg);
        }
        out
    }

    fn connect(id: &str, names: &[&str]) -> ServerMessage {
        ServerMessage::Connect(Connect {
            id: PeerId::from(id),
            keys: keys(names),
        })
    }

    #[test]
    fn shared_key_introduces_both_sides() {
        let svc = service();
        let a = PeerId::from("local-1");
        let b = PeerId::from("remote-1");
        let mut ra = svc.register(&a);
        let mut rb = svc.register(&b);

        assert!(svc.apply_interest(&a, &keys(&["doc-42"]), &[]).is_empty());
        let intros = svc.apply_interest(&b, &keys(&["doc-42"]), &[]);
        assert_eq!(intros.len(), 1);

        assert_eq!(drain(&mut ra), vec![connect("remote-1", &["doc-42"])]);
        assert_eq!(drain(&mut rb), vec![connect("local-1", &["doc-42"])]);
    }

    #[test]
    fn n_peers_on_one_key_yield_all_directed_pairs() {
        let svc = service();
        let n = 5;
        let mut regs: Vec<(PeerId, Registration)> = (0..n)
            .map(|i| {
                let id = PeerId::new(format!("p{}", i));
                let reg = svc.register(&id);
                (id, reg)
            })
            .collect();

        for (id, _) in &regs {
            svc.apply_interest(id, &keys(&["k"]), &[]);
        }

        let mut directed = std::collections::HashSet::new();
        for (id, reg) in regs.iter_mut() {
            for ServerMessage::Connect(c) in drain(reg) {
                assert_ne!(&c.id, id, "peer introduced to itself");
                directed.insert((id.clone(), c.id));
            }
        }
        assert_eq!(directed.len(), n * (n - 1));
    }

    #[test]
    fn connect_lists_only_shared_keys() {
        let svc = service();
        let a = PeerId::from("a");
        let b = PeerId::from("b");
        let mut ra = svc.register(&a);
        let _rb = svc.register(&b);

        svc.apply_interest(&b, &keys(&["x", "y"]), &[]);
        svc.apply_interest(&a, &keys(&["y", "z"]), &[]);

        assert_eq!(drain(&mut ra), vec![connect("b", &["y"])]);
    }

    #[test]
    fn leave_in_same_message_wins() {
        let svc = service();
        let a = PeerId::from("a");
        let b = PeerId::from("b");
        let _ra = svc.register(&a);
        let mut rb = svc.register(&b);

        svc.apply_interest(&b, &keys(&["k"]), &[]);
        let intros = svc.apply_interest(&a, &keys(&["k"]), &keys(&["k"]));
        assert!(intros.is_empty());
        assert!(drain(&mut rb).is_empty());
    }

    #[test]
    fn no_shared_keys_no_connect() {
        let svc = service();
        let a = PeerId::from("a");
        let b = PeerId::from("b");
        let mut ra = svc.register(&a);
        let mut rb = svc.register(&b);

        svc.apply_interest(&a, &keys(&["x"]), &[]);
        svc.apply_interest(&b, &keys(&["y"]), &[]);

        assert!(drain(&mut ra).is_empty());
        assert!(drain(&mut rb).is_empty());
    }

    #[test]
    fn unknown_peer_is_ignored() {
        let svc = service();
        let intros = svc.apply_interest(&PeerId::from("ghost"), &keys(&["k"]), &[]);
        assert!(intros.is_empty());
        assert_eq!(svc.peer_count(), 0);
    }

    #[test]
    fn stale_unregister_keeps_new_registration() {
        let svc = service();
        let a = PeerId::from("a");
        let old = svc.register(&a);
        let _new = svc.register(&a);

        svc.unregister(&a, old.session);
        assert_eq!(svc.peer_count(), 1);
    }

    #[test]
    fn introductions_are_counted_and_published() {
        let (events, mut rx) = broadcast::channel(64);
        let metrics = Arc::new(RelayMetrics::default());
        let svc = IntroductionService::new(events, metrics.clone());
        let a = PeerId::from("a");
        let b = PeerId::from("b");
        let _ra = svc.register(&a);
        let _rb = svc.register(&b);

        svc.apply_interest(&a, &keys(&["k"]), &[]);
        svc.apply_interest(&b, &keys(&["k"]), &[]);

        assert_eq!(metrics.introductions_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.registrations_total.load(Ordering::Relaxed), 2);

        let mut introduced = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, RelayEvent::Introduced { .. }) {
                introduced += 1;
            }
        }
        assert_eq!(introduced, 1);
    }
}
