//! The bus-side main loop.
//!
//! # Responsibilities
//! - Own the transaction engine for the life of the process
//! - Drive one bus exchange per pass
//! - Service at most one queued HTTP exchange per pass
//! - Answer or log messages the peer originates
//! - Apply configuration reloads between passes
//!
//! # Data Flow
//! ```text
//! pass:
//!     config updates  → clock, deadline, routes, idle interval, device
//!     engine          → do_transaction()
//!     request queue   → Router → Bridge (proxy) | 404
//!     inbound frame   → dispatch by opcode → take_incoming_data()
//!     idle?           → sleep idle interval
//! ```
//!
//! # Design Decisions
//! - Runs on a dedicated OS thread; never touches the async runtime
//! - Requests whose client left while queued never reach the bus
//! - Shutdown is observed at the top of each pass only; a proxy call in
//!   progress runs to completion or deadline first

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::bus::engine::{Exchange, TransactionEngine};
use crate::bus::frame::{Opcode, PacketClass};
use crate::bus::transport::BusTransport;
use crate::config::GatewayConfig;
use crate::gateway::bridge::{Bridge, BridgeSettings};
use crate::gateway::status::StatusPublisher;
use crate::http::exchange::{HttpExchange, CONTENT_TYPE_JSON};
use crate::observability::metrics;
use crate::routing::Router;

/// What one pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    pub exchange: Exchange,
    pub serviced_client: bool,
    pub peer_message: Option<Opcode>,
}

impl Pass {
    /// Nothing moved on the bus and no client was served.
    pub fn is_idle(&self) -> bool {
        let bus_idle = match self.exchange {
            Exchange::Completed { sent, received } => !sent && received.is_none(),
            Exchange::Skipped => true,
            Exchange::Rejected { .. } | Exchange::Faulted => false,
        };
        bus_idle && !self.serviced_client && self.peer_message.is_none()
    }
}

/// Body of the 404 answer for unrouted paths.
pub fn not_found_body(path: &str) -> String {
    format!(
        "{{\"err\": {}}}",
        Value::String(format!("404: {} NOT FOUND", path))
    )
}

pub struct PollLoop<T, E> {
    engine: TransactionEngine<T>,
    bridge: Bridge,
    router: Router,
    status: StatusPublisher,
    requests: mpsc::Receiver<E>,
    config_updates: Option<mpsc::UnboundedReceiver<GatewayConfig>>,
    idle_interval: Duration,
}

impl<T, E> PollLoop<T, E>
where
    T: BusTransport,
    E: HttpExchange,
{
    pub fn new(
        engine: TransactionEngine<T>,
        config: &GatewayConfig,
        status: StatusPublisher,
        requests: mpsc::Receiver<E>,
    ) -> Self {
        Self {
            engine,
            bridge: Bridge::new(BridgeSettings::from_config(&config.bridge)),
            router: Router::from_config(&config.routes),
            status,
            requests,
            config_updates: None,
            idle_interval: Duration::from_micros(config.bus.idle_poll_us),
        }
    }

    /// Apply configurations arriving on `updates` between passes.
    pub fn with_config_updates(mut self, updates: mpsc::UnboundedReceiver<GatewayConfig>) -> Self {
        self.config_updates = Some(updates);
        self
    }

    pub fn engine(&self) -> &TransactionEngine<T> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TransactionEngine<T> {
        &mut self.engine
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Run until shutdown is signalled, then hand the engine back.
    pub fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> TransactionEngine<T> {
        tracing::info!(
            routes = self.router.len(),
            clock_hz = self.engine.clock_hz(),
            "Poll loop started"
        );

        self.status.publish(&mut self.engine);

        loop {
            match shutdown.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => break,
            }

            let pass = self.run_once();
            if pass.is_idle() && !self.idle_interval.is_zero() {
                std::thread::sleep(self.idle_interval);
            }
        }

        let stats = self.engine.stats();
        tracing::info!(
            exchanges = stats.exchanges,
            frames_sent = stats.frames_sent,
            frames_received = stats.frames_received,
            frames_rejected = stats.frames_rejected,
            faults = stats.faults,
            "Poll loop stopped"
        );
        self.engine
    }

    /// One iteration of the loop.
    pub fn run_once(&mut self) -> Pass {
        self.apply_config_updates();

        let exchange = self.engine.do_transaction();

        let serviced_client = match self.requests.try_recv() {
            Ok(mut client) => {
                self.service(&mut client);
                true
            }
            Err(_) => false,
        };

        let peer_message = if self.engine.data_ready() {
            Some(self.dispatch_peer_message())
        } else {
            None
        };

        Pass {
            exchange,
            serviced_client,
            peer_message,
        }
    }

    /// Route one HTTP exchange to the bridge, or answer 404.
    pub fn service(&mut self, exchange: &mut E) {
        if exchange.client_gone() {
            tracing::debug!(
                request_id = ?exchange.request_id(),
                path = %exchange.path(),
                "Client left while queued, request dropped"
            );
            return;
        }

        let route = self.router.match_request(exchange.method(), exchange.path());
        match route {
            Some(route) => {
                tracing::debug!(
                    request_id = ?exchange.request_id(),
                    route = %route.name,
                    path = %exchange.path(),
                    "Route matched"
                );
                if let Err(e) = self.bridge.proxy(&mut self.engine, exchange, &route.target) {
                    tracing::warn!(
                        request_id = ?exchange.request_id(),
                        route = %route.name,
                        error = %e,
                        "Proxied request failed"
                    );
                }
            }
            None => {
                tracing::debug!(
                    request_id = ?exchange.request_id(),
                    path = %exchange.path(),
                    "No route matched"
                );
                let body = not_found_body(exchange.path());
                exchange.respond(404, CONTENT_TYPE_JSON, body.as_bytes());
            }
        }
    }

    /// Handle the frame in the inbound slot and release it.
    fn dispatch_peer_message(&mut self) -> Opcode {
        let kind = self.engine.kind();
        let opcode = kind.opcode();
        metrics::record_peer_message(opcode);

        match (kind.class(), opcode) {
            (Some(PacketClass::Request), Opcode::GET_NETWORK_INFO) => {
                // Release first so scheduling the reply raises request-pending.
                self.engine.take_incoming_data();
                match self.status.reply(&mut self.engine) {
                    Ok(()) => tracing::debug!("Network info reply scheduled"),
                    Err(e) => tracing::warn!(error = %e, "Network info reply dropped"),
                }
                return opcode;
            }
            (_, Opcode::MACHINE_CONFIG_CHANGED) => {
                tracing::info!("Peer reports machine configuration changed");
            }
            (_, Opcode::NETWORK_CONFIG) | (_, Opcode::NETWORK_ENABLE) => {
                tracing::warn!(opcode = %opcode, "Unsupported network provisioning request from peer");
            }
            _ => {
                let (fragment, last) = self.engine.fragment_info();
                tracing::debug!(
                    kind = %kind,
                    fragment,
                    last,
                    length = self.engine.data().len(),
                    "Discarding unsolicited frame"
                );
            }
        }

        self.engine.take_incoming_data();
        opcode
    }

    fn apply_config_updates(&mut self) {
        let Some(updates) = self.config_updates.as_mut() else {
            return;
        };
        let mut latest = None;
        while let Ok(config) = updates.try_recv() {
            latest = Some(config);
        }
        if let Some(config) = latest {
            self.apply_config(&config);
        }
    }

    /// Take over the reloadable parts of a new configuration.
    pub fn apply_config(&mut self, config: &GatewayConfig) {
        self.engine.set_clock_hz(config.bus.clock_hz);
        self.bridge.set_settings(BridgeSettings::from_config(&config.bridge));
        self.router = Router::from_config(&config.routes);
        self.idle_interval = Duration::from_micros(config.bus.idle_poll_us);
        self.status.set_device(config.device.clone());

        tracing::info!(
            clock_hz = config.bus.clock_hz,
            deadline_ms = config.bridge.deadline_ms,
            routes = config.routes.len(),
            "Configuration applied to poll loop"
        );
    }
}
