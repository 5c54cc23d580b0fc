//! Relay state and server lifecycle.
//!
//! [`Relay`] owns the introduction service, the connection broker, rate
//! limiters, metrics and the event channel. [`RelayServer`] binds it to a TCP
//! listener and tears it down again.

use crate::broker::ConnectionBroker;
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::http;
use crate::introduction::IntroductionService;
use crate::limits::RateLimits;
use crate::maintenance::spawn_maintenance_task;
use rendezvous_types::{Key, PairKey, PeerId};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

/// Operational metrics for monitoring relay activity.
///
/// Counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total WebSocket connections accepted on either endpoint.
    pub connections_total: AtomicU64,
    /// Total registrations (including re-registrations).
    pub registrations_total: AtomicU64,
    /// Total Connect messages queued for delivery.
    pub introductions_total: AtomicU64,
    /// Total registration frames dropped as malformed.
    pub malformed_messages_total: AtomicU64,
    /// Total direct connections matched with a partner.
    pub pairs_established_total: AtomicU64,
    /// Total pending connections closed before a partner arrived.
    pub pending_orphaned_total: AtomicU64,
    /// Total payload bytes forwarded between direct connections.
    pub bytes_piped_total: AtomicU64,
    /// Total rate limit rejections (connections + messages).
    pub rate_limit_hits: AtomicU64,
    /// Pairs currently piping.
    pub pairs_active: AtomicU64,
}

/// Observable relay activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A registration connection was accepted.
    PeerConnected(PeerId),
    /// A registration connection ended.
    PeerDisconnected(PeerId),
    /// Two peers were sent Connect messages naming each other.
    Introduced {
        /// Peer whose interest changed.
        a: PeerId,
        /// The peer it was introduced to.
        b: PeerId,
        /// Keys both hold.
        keys: Vec<Key>,
    },
    /// A direct connection is waiting for its partner.
    PairPending(PairKey),
    /// Both sides of a direct connection are piped.
    PairEstablished(PairKey),
    /// A direct connection ended (piped or orphaned).
    PairClosed(PairKey),
}

/// Shared relay state.
pub struct Relay {
    config: Config,
    introductions: IntroductionService,
    broker: ConnectionBroker,
    rate_limits: RateLimits,
    metrics: Arc<RelayMetrics>,
    events: broadcast::Sender<RelayEvent>,
    shutdown: watch::Sender<bool>,
    started_at: Instant,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("peers", &self.total_peers())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create relay state from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let rate_limits = RateLimits::new(&config.limits)?;
        let (events, _) = broadcast::channel(config.events.capacity);
        let (shutdown, _) = watch::channel(false);
        let metrics = Arc::new(RelayMetrics::default());

        Ok(Self {
            introductions: IntroductionService::new(events.clone(), metrics.clone()),
            broker: ConnectionBroker::new(events.clone(), metrics.clone()),
            config,
            rate_limits,
            metrics,
            events,
            shutdown,
            started_at: Instant::now(),
        })
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registered peers and the introduction rule.
    pub fn introductions(&self) -> &IntroductionService {
        &self.introductions
    }

    /// Pending and piped direct connections.
    pub fn broker(&self) -> &ConnectionBroker {
        &self.broker
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Subscribe to relay events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Receiver that flips to `true` when the relay shuts down.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Number of registered peers.
    pub fn total_peers(&self) -> usize {
        self.introductions.peer_count()
    }

    /// Number of direct connections waiting for a partner.
    pub fn pending_count(&self) -> usize {
        self.broker.pending_count()
    }

    /// Number of direct connection pairs currently piping.
    pub fn active_pairs(&self) -> u64 {
        self.metrics.pairs_active.load(Ordering::Relaxed)
    }

    /// Time since this relay was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Signal every connection task to stop and drop all in-memory state.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.introductions.clear();
        self.broker.clear();
    }
}

/// Whether `signal` reports shutdown, marking the current value seen.
///
/// Call right after subscribing: a shutdown that happened earlier is seen
/// here, and one that happens later wakes `changed()`.
pub(crate) fn is_stopped(signal: &mut watch::Receiver<bool>) -> bool {
    *signal.borrow_and_update()
}

/// A listening server task.
struct Serving {
    address: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
    maintenance: JoinHandle<()>,
}

/// Rendezvous relay server.
///
/// ```no_run
/// # async fn run() -> rendezvous_relay::error::Result<()> {
/// use rendezvous_relay::{config::Config, server::RelayServer};
///
/// let server = RelayServer::new(Config::default())?;
/// let address = server.listen().await?;
/// println!("listening on {}", address);
/// server.close().await;
/// # Ok(())
/// # }
/// ```
pub struct RelayServer {
    relay: Arc<Relay>,
    serving: Mutex<Option<Serving>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("relay", &self.relay)
            .field("local_addr", &self.local_addr())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl RelayServer {
    /// Create a server. Nothing is bound until [`listen`](Self::listen).
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            relay: Arc::new(Relay::new(config)?),
            serving: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Shared relay state.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Subscribe to relay events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.relay.subscribe()
    }

    /// The bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.serving_slot().as_ref().map(|serving| serving.address)
    }

    fn serving_slot(&self) -> std::sync::MutexGuard<'_, Option<Serving>> {
        self.serving
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind the configured address and start accepting connections.
    ///
    /// Returns the bound address (useful with port 0).
    pub async fn listen(&self) -> Result<SocketAddr> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Closed);
        }
        if let Some(address) = self.local_addr() {
            return Err(RelayError::AlreadyListening(address));
        }

        let bind = self.relay.config().server.bind_address();
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|source| RelayError::Bind {
                address: bind.clone(),
                source,
            })?;
        let address = listener.local_addr()?;

        let mut slot = self.serving_slot();
        if let Some(existing) = slot.as_ref() {
            return Err(RelayError::AlreadyListening(existing.address));
        }

        let app = http::build_router(self.relay.clone());
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stopped.await;
                })
                .await
        });
        let maintenance =
            spawn_maintenance_task(self.relay.clone(), self.relay.config().maintenance.clone());

        *slot = Some(Serving {
            address,
            stop,
            task,
            maintenance,
        });

        tracing::info!("Relay listening on {}", address);
        Ok(address)
    }

    /// Stop accepting, close every connection and release all state.
    ///
    /// Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.relay.shutdown();
        let serving = self.serving_slot().take();

        if let Some(serving) = serving {
            let _ = serving.stop.send(());
            match serving.task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Server task ended with error: {}", e),
                Err(e) => tracing::warn!("Server task failed: {}", e),
            }
            serving.maintenance.abort();
            tracing::info!("Relay on {} closed", serving.address);
        }
    }
}
