//! rendezvous-relay binary entry point.
//!
//! Usage:
//! ```bash
//! rendezvous-relay --config relay.toml
//! PORT=9000 rendezvous-relay
//! ```

use anyhow::Context;
use rendezvous_relay::config::Config;
use rendezvous_relay::server::RelayServer;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = get_config_path();
    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    tracing::info!("rendezvous-relay v{}", env!("CARGO_PKG_VERSION"));

    let server = RelayServer::new(config).context("creating relay")?;
    server.listen().await.context("starting relay")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    server.close().await;
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}
