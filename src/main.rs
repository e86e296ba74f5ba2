//! bus-gateway
//!
//! Serves HTTP on the network side and forwards selected requests to a peer
//! controller over a synchronous word bus.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────────────┐
//!                      │                      BUS GATEWAY                       │
//!                      │                                                        │
//!   Client Request     │  ┌──────────┐   queue   ┌───────────┐   ┌──────────┐   │
//!   ───────────────────┼─▶│   http   │──────────▶│   poll    │──▶│  router  │   │
//!                      │  │  server  │           │   loop    │   └────┬─────┘   │
//!                      │  └────▲─────┘           │ (thread)  │        ▼         │
//!                      │       │ head + chunks   │           │   ┌──────────┐   │
//!   Client Response    │       └─────────────────│           │◀──│  bridge  │   │
//!   ◀──────────────────┼──                       └─────┬─────┘   └────┬─────┘   │
//!                      │                               │              │         │
//!                      │                         ┌─────▼──────────────▼─────┐   │
//!                      │                         │  transaction engine      │◀──┼── Peer
//!                      │                         │  (inbound / outbound)    │──▶┼── Controller
//!                      │                         └──────────────────────────┘   │
//!                      │                                                        │
//!                      │   config · observability · lifecycle (cross-cutting)  │
//!                      └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use bus_gateway::config::ConfigWatcher;
use bus_gateway::http::HttpServer;
use bus_gateway::lifecycle::{signals, startup, Shutdown};
use bus_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "bus-gateway")]
#[command(about = "Forward HTTP requests to a peer controller over the bus", long_about = None)]
struct Cli {
    /// TOML configuration file; reloaded when it changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = startup::load(cli.config.as_deref())?;
    // Reloads are compared against the file, not the command-line overrides.
    let file_config = config.clone();
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "bus-gateway starting");
    tracing::info!(
        path = ?cli.config,
        bind_address = %config.listener.bind_address,
        clock_hz = config.bus.clock_hz,
        deadline_ms = config.bridge.deadline_ms,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, "Listening for connections");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher must stay alive for reloads to arrive.
    let mut _watcher = None;
    let mut config_updates = None;
    if let Some(path) = cli.config.as_deref() {
        let (watcher, updates) = ConfigWatcher::new(path, file_config);
        match watcher.run() {
            Ok(w) => {
                _watcher = Some(w);
                config_updates = Some(updates);
            }
            Err(e) => tracing::warn!(error = %e, "Config hot reload disabled"),
        }
    }

    let shutdown = Shutdown::new();
    let (queue_tx, queue_rx) = mpsc::channel(config.listener.queue_depth);

    let poll_thread = startup::spawn_poll_loop(
        startup::build_transport(&config.bus),
        &config,
        startup::reported_ip(local_addr),
        queue_rx,
        config_updates,
        shutdown.subscribe(),
    )?;

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move { signals::shutdown_on_signal(&signal_shutdown).await });

    let server = HttpServer::new(config.listener.clone(), queue_tx);
    let served = server.run(listener, shutdown.subscribe()).await;
    shutdown.trigger();

    match tokio::task::spawn_blocking(move || poll_thread.join()).await? {
        Ok(stats) => tracing::info!(
            exchanges = stats.exchanges,
            faults = stats.faults,
            "Bus poll thread finished"
        ),
        Err(_) => tracing::error!("Bus poll thread panicked"),
    }

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}
