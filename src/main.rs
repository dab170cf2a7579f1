//! route-gateway binary.
//!
//! ```text
//!   --config gateway.toml
//!        │
//!        ▼
//!   load_config ──▶ Gateway (route table, per-route state, dispatcher)
//!        │                │
//!        ▼                ▼
//!   ConfigWatcher ──▶ HttpServer ◀── Shutdown ◀── SIGINT/SIGTERM
//!                         │
//!                         └── maintenance sweep
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use route_gateway::config::{load_config, ConfigWatcher};
use route_gateway::lifecycle::{signals, Shutdown};
use route_gateway::observability::{logging, metrics};
use route_gateway::pipeline::{AnonymousAuthenticator, Gateway, HttpDispatcher};
use route_gateway::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "route-gateway", version, about = "API gateway request-processing core")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        routes = config.routes.len(),
        "route-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let dispatcher = Arc::new(HttpDispatcher::new(config.listener.max_body_size));
    let gateway = Gateway::new(&config, dispatcher, Arc::new(AnonymousAuthenticator))
        .map(Arc::new)
        .map_err(|errors| {
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        })?;

    let shutdown = Shutdown::new();
    let maintenance = gateway.spawn_maintenance(
        Duration::from_secs(config.maintenance.sweep_interval_secs),
        shutdown.subscribe(),
    );

    let (watcher, config_updates) = ConfigWatcher::new(&cli.config);
    let _watcher = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    tokio::spawn(signals::wait_for_shutdown(shutdown.clone()));

    let server = HttpServer::new(gateway, config.listener.max_body_size);
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    let _ = maintenance.await;
    tracing::info!("Shutdown complete");
    Ok(())
}
