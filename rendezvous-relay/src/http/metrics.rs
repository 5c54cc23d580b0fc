//! Prometheus metrics endpoint.

use crate::server::Relay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
pub async fn metrics_handler(Extension(relay): Extension<Arc<Relay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay),
    )
}

/// Render gauges (current state) and counters (monotonic since startup).
fn render(relay: &Relay) -> String {
    let m = relay.metrics();

    let peers = relay.total_peers();
    let pending = relay.pending_count();
    let pairs = relay.active_pairs();

    let connections = m.connections_total.load(Ordering::Relaxed);
    let registrations = m.registrations_total.load(Ordering::Relaxed);
    let introductions = m.introductions_total.load(Ordering::Relaxed);
    let malformed = m.malformed_messages_total.load(Ordering::Relaxed);
    let established = m.pairs_established_total.load(Ordering::Relaxed);
    let orphaned = m.pending_orphaned_total.load(Ordering::Relaxed);
    let bytes = m.bytes_piped_total.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);

    format!(
        r#"# HELP rendezvous_relay_peers Number of registered peers
# TYPE rendezvous_relay_peers gauge
rendezvous_relay_peers {peers}

# HELP rendezvous_relay_pending_connections Direct connections waiting for a partner
# TYPE rendezvous_relay_pending_connections gauge
rendezvous_relay_pending_connections {pending}

# HELP rendezvous_relay_pairs_active Direct connection pairs currently piping
# TYPE rendezvous_relay_pairs_active gauge
rendezvous_relay_pairs_active {pairs}

# HELP rendezvous_relay_info Server information
# TYPE rendezvous_relay_info gauge
rendezvous_relay_info{{version="{version}"}} 1

# HELP rendezvous_relay_connections_total Total WebSocket connections accepted
# TYPE rendezvous_relay_connections_total counter
rendezvous_relay_connections_total {connections}

# HELP rendezvous_relay_registrations_total Total peer registrations
# TYPE rendezvous_relay_registrations_total counter
rendezvous_relay_registrations_total {registrations}

# HELP rendezvous_relay_introductions_total Total Connect messages sent
# TYPE rendezvous_relay_introductions_total counter
rendezvous_relay_introductions_total {introductions}

# HELP rendezvous_relay_malformed_messages_total Total registration frames dropped as malformed
# TYPE rendezvous_relay_malformed_messages_total counter
rendezvous_relay_malformed_messages_total {malformed}

# HELP rendezvous_relay_pairs_established_total Total direct connections matched
# TYPE rendezvous_relay_pairs_established_total counter
rendezvous_relay_pairs_established_total {established}

# HELP rendezvous_relay_pending_orphaned_total Total pending connections closed before a partner arrived
# TYPE rendezvous_relay_pending_orphaned_total counter
rendezvous_relay_pending_orphaned_total {orphaned}

# HELP rendezvous_relay_bytes_piped_total Total payload bytes forwarded between direct connections
# TYPE rendezvous_relay_bytes_piped_total counter
rendezvous_relay_bytes_piped_total {bytes}

# HELP rendezvous_relay_rate_limit_hits_total Total rate limit rejections
# TYPE rendezvous_relay_rate_limit_hits_total counter
rendezvous_relay_rate_limit_hits_total {rate_limits}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
