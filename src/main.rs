//! Traffic gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌────────────────────────────────────────────────────┐
//!                         │                  TRAFFIC GATEWAY                    │
//!                         │                                                     │
//!   Client Request        │  ┌────────────┐   ┌──────────────┐   ┌───────────┐ │
//!   ──────────────────────┼─▶│ rate limit │──▶│ circuit      │──▶│ load      │ │
//!                         │  │ (admit)    │   │ breaker      │   │ balancer  │ │
//!                         │  └────────────┘   └──────────────┘   └─────┬─────┘ │
//!                         │                                            ▼       │
//!   Client Response       │                   ┌──────────────────────────────┐ │
//!   ◀─────────────────────┼───────────────────│ service proxy (retry, parse) │◀┼── Upstream
//!                         │                   └──────────────────────────────┘ │
//!                         │                                                     │
//!                         │  config · health probes · events/metrics · admin   │
//!                         └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use traffic_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use traffic_gateway::lifecycle::{signals::wait_for_signal, Gateway};
use traffic_gateway::observability::{logging::init_logging, metrics::init_metrics};

#[derive(Parser)]
#[command(name = "traffic-gateway", version, about = "Resilient API gateway")]
struct Args {
    /// Path to the TOML configuration file; reloaded on change.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "traffic-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let bind_address = config.listener.bind_address.clone();
    let mut gateway = Gateway::build(config).await;

    // The watcher stops when dropped, so it lives as long as main.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            gateway.watch_config(updates);
            Some(watcher.run()?)
        }
        None => None,
    };

    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    tokio::spawn(wait_for_signal(gateway.shutdown_handle()));
    gateway.run(listener).await?;
    Ok(())
}
