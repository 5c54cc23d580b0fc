//! HTTP surface of the relay.
//!
//! Mounts both WebSocket endpoints plus health and metrics.

pub mod health;
mod metrics;

use crate::protocol::{connect_handler, introduction_handler, CONNECT_ROUTE, INTRODUCTION_ROUTE};
use crate::server::Relay;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the router with all endpoints.
pub fn build_router(relay: Arc<Relay>) -> Router {
    let mut router = Router::new()
        .route(INTRODUCTION_ROUTE, get(introduction_handler))
        .route(CONNECT_ROUTE, get(connect_handler))
        .route("/health", get(health::health_handler));

    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(relay))
}
