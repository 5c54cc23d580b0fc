//! WebSocket endpoint handlers.
//!
//! - `/introduction/{peerId}`: registration connection, JSON text frames.
//! - `/connect/{local}/{remote}/{key}`: direct connection, frames forwarded
//!   verbatim once both sides are present.
//!
//! Both endpoints share the global connection rate limit, checked before the
//! upgrade so refused clients get a plain HTTP 429.

use crate::server::Relay;
use crate::session::Session;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use rendezvous_types::{Key, PairKey, PeerId};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Route of the registration endpoint.
pub const INTRODUCTION_ROUTE: &str = "/introduction/:peer_id";

/// Route of the direct connection endpoint.
pub const CONNECT_ROUTE: &str = "/connect/:local/:remote/:key";

/// Apply the connection quota. Returns the refusal response if exceeded.
fn admit(relay: &Relay) -> Option<Response> {
    if relay.is_shutting_down() {
        return Some(StatusCode::SERVICE_UNAVAILABLE.into_response());
    }
    if let Err(e) = relay.rate_limits().check_connection() {
        tracing::warn!("Refusing connection: {}", e);
        relay
            .metrics()
            .rate_limit_hits
            .fetch_add(1, Ordering::Relaxed);
        return Some((StatusCode::TOO_MANY_REQUESTS, e.to_string()).into_response());
    }
    relay
        .metrics()
        .connections_total
        .fetch_add(1, Ordering::Relaxed);
    None
}

/// Upgrade a registration connection for `peer_id`.
pub async fn introduction_handler(
    ws: WebSocketUpgrade,
    Path(peer_id): Path<String>,
    Extension(relay): Extension<Arc<Relay>>,
) -> Response {
    if let Some(refused) = admit(&relay) {
        return refused;
    }

    let peer = PeerId::new(peer_id);
    tracing::debug!("Registration connection from {}", peer);
    ws.on_upgrade(move |socket| Session::new(relay, peer).run(socket))
}

/// Upgrade one side of the direct connection `local`/`remote`/`key`.
pub async fn connect_handler(
    ws: WebSocketUpgrade,
    Path((local, remote, key)): Path<(String, String, String)>,
    Extension(relay): Extension<Arc<Relay>>,
) -> Response {
    if let Some(refused) = admit(&relay) {
        return refused;
    }

    let pair = PairKey::new(PeerId::new(local), PeerId::new(remote), Key::new(key));
    tracing::debug!("Direct connection for {}", pair);
    ws.on_upgrade(move |socket| async move {
        let shutdown = relay.shutdown_signal();
        relay.broker().accept(socket, pair, shutdown).await;
    })
}
