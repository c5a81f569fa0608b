//! pylond — Pylon cluster node daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use pylon_cluster::clusterd;
use pylon_core::ClusterConfig;
use pylon_services::{EchoService, HttpService, PingService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing — RUST_LOG controls verbosity
    // e.g. RUST_LOG=debug cargo run -p pylond
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PYLON_CONFIG").ok())
        .unwrap_or_else(|| "pylon.toml".to_string());
    let config = ClusterConfig::from_file(&config_path)
        .with_context(|| format!("loading cluster config from {config_path}"))?;
    let local = config.local.clone();
    if local.is_empty() {
        anyhow::bail!("{config_path} does not name a local node");
    }

    let registry = clusterd::global();
    registry.reload(config).await?;

    registry.register("echo", Arc::new(EchoService))?;
    registry.register("ping", Arc::new(PingService))?;
    registry.register("http", Arc::new(HttpService::new()))?;

    let bound = registry.open(&local).await?;
    tracing::info!(node = %local, addr = %bound, "pylond started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("pylond shutting down");
    Ok(())
}
