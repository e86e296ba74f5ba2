//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Build the bus transport and engine
//! - Start the poll loop on its own thread
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - No configuration file means built-in defaults

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::thread::JoinHandle;

use tokio::sync::{broadcast, mpsc};

use crate::bus::engine::{EngineStats, TransactionEngine};
use crate::bus::sim::{echo_responder, SimulatedPeer};
use crate::bus::transport::BusTransport;
use crate::config::{load_config, BusConfig, ConfigError, GatewayConfig, TransportKind};
use crate::gateway::poll::PollLoop;
use crate::gateway::status::StatusPublisher;
use crate::http::exchange::HttpExchange;

/// Transport type the binary drives.
pub type DynTransport = Box<dyn BusTransport + Send>;

/// Load configuration from `path`, or defaults when there is none.
///
/// Runs before logging is initialised, so it does not log.
pub fn load(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => Ok(GatewayConfig::default()),
    }
}

pub fn build_transport(config: &BusConfig) -> DynTransport {
    match config.transport {
        TransportKind::Simulated => {
            tracing::info!("Using simulated bus peer");
            Box::new(SimulatedPeer::with_responder(echo_responder()))
        }
    }
}

/// Address reported in the status record when none is configured.
pub fn reported_ip(local_addr: SocketAddr) -> Ipv4Addr {
    match local_addr.ip() {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(v6) => v6.to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
    }
}

/// Start the poll loop on a dedicated thread named `bus-poll`.
pub fn spawn_poll_loop<T, E>(
    transport: T,
    config: &GatewayConfig,
    fallback_ip: Ipv4Addr,
    requests: mpsc::Receiver<E>,
    config_updates: Option<mpsc::UnboundedReceiver<GatewayConfig>>,
    shutdown: broadcast::Receiver<()>,
) -> std::io::Result<JoinHandle<EngineStats>>
where
    T: BusTransport + Send + 'static,
    E: HttpExchange + Send + 'static,
{
    let engine = TransactionEngine::new(transport, config.bus.clock_hz);
    let status = StatusPublisher::from_config(&config.device, fallback_ip);
    let mut poll_loop = PollLoop::new(engine, config, status, requests);
    if let Some(updates) = config_updates {
        poll_loop = poll_loop.with_config_updates(updates);
    }

    std::thread::Builder::new()
        .name("bus-poll".to_string())
        .spawn(move || poll_loop.run(shutdown).stats())
}
