//! Peer registration tracker.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                     PEER TRACKER                      │
//!                 │                                                      │
//!   Peer node     │  ┌──────────┐   ┌────────────┐   ┌──────────────┐    │
//!   ──────────────┼─▶│   net    │──▶│ connection │──▶│  rate limit  │    │
//!                 │  │ listener │   │  handler   │   │ (per source) │    │
//!                 │  └──────────┘   └─────┬──────┘   └──────┬───────┘    │
//!                 │                       │ admitted        │ denied     │
//!                 │                       ▼                 ▼            │
//!                 │                ┌─────────────┐     429 + close       │
//!                 │                │ http routes │                       │
//!                 │                └──────┬──────┘                       │
//!                 │                       ▼                              │
//!                 │                ┌─────────────┐                       │
//!                 │                │node registry│                       │
//!                 │                └─────────────┘                       │
//!                 │                                                      │
//!                 │  lifecycle (start/stop/drain) · config · observability│
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use peer_tracker::config::{load_config, TrackerConfig};
use peer_tracker::lifecycle::signals::wait_for_signal;
use peer_tracker::observability::{logging, metrics};
use peer_tracker::{MemoryRegistry, TrackerService};

#[derive(Parser, Debug)]
#[command(name = "peer-tracker", version)]
#[command(about = "Peer registration tracker")]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the port of `listener.bind_address`.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(port) = args.port {
        let mut addr: SocketAddr = config.listener.bind_address.parse()?;
        addr.set_port(port);
        config.listener.bind_address = addr.to_string();
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "peer-tracker starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        rate_limit_threshold = config.rate_limit.threshold,
        rate_limit_window_secs = config.rate_limit.window_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = match &config.registry.persistence_path {
        Some(path) => MemoryRegistry::load_from_file(path)?,
        None => MemoryRegistry::new(None),
    };

    let service = TrackerService::new(config, Arc::new(registry.clone()));
    service.start().await?;

    let signal = wait_for_signal().await?;
    tracing::info!(signal, "Shutdown signal received");

    tokio::select! {
        _ = service.stop() => {}
        _ = wait_for_signal() => {
            tracing::warn!("Second signal received, hard shutdown");
            std::process::exit(1);
        }
    }

    if let Err(e) = registry.save_to_file() {
        tracing::error!(error = %e, "Failed to save registry snapshot");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
