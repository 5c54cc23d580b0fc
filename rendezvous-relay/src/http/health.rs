//! Health check endpoint.

use crate::server::Relay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of registered peers.
    pub peers: usize,
    /// Direct connections waiting for a partner.
    pub pending: usize,
    /// Direct connection pairs currently piping.
    pub pairs: u64,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

impl HealthStatus {
    /// Snapshot the relay.
    pub fn of(relay: &Relay) -> Self {
        Self {
            status: if relay.is_shutting_down() {
                "shutting_down".to_string()
            } else {
                "ok".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            peers: relay.total_peers(),
            pending: relay.pending_count(),
            pairs: relay.active_pairs(),
            uptime_seconds: relay.uptime().as_secs(),
        }
    }
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<Relay>>) -> Json<HealthStatus> {
    Json(HealthStatus::of(&relay))
}
