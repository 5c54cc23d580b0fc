//! Background maintenance task.
//!
//! Runs periodically to evict idle rate-limiter state and log relay sizes.

use crate::config::MaintenanceConfig;
use crate::server::Relay;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn the maintenance task.
///
/// The task exits when the relay shuts down. Returns a handle that can be
/// used to abort it.
pub fn spawn_maintenance_task(
    relay: Arc<Relay>,
    config: MaintenanceConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Maintenance task disabled");
            return;
        }

        let interval_secs = config.interval_secs;
        tracing::info!("Maintenance task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));
        let mut shutdown = relay.shutdown_signal();

        loop {
            tokio::select! {
                _ = timer.tick() => run_once(&relay),
                _ = shutdown.changed() => break,
            }
        }

        tracing::debug!("Maintenance task stopped");
    })
}

/// One maintenance pass.
fn run_once(relay: &Relay) {
    let before = relay.rate_limits().message_keys_count();
    relay.rate_limits().shrink();
    let after = relay.rate_limits().message_keys_count();

    tracing::debug!(
        "Maintenance: peers={} pending={} pairs={} limiter_keys={}->{}",
        relay.total_peers(),
        relay.pending_count(),
        relay.active_pairs(),
        before,
        after
    );
}
