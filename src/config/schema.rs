//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener settings.
    pub listener: ListenerConfig,

    /// Peer bus settings.
    pub bus: BusConfig,

    /// HTTP-to-bus bridge settings.
    pub bridge: BridgeConfig,

    /// Proxied path prefixes, matched in order.
    pub routes: Vec<RouteConfig>,

    /// Values reported in the status record.
    pub device: DeviceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Requests that may wait for the poll loop before new ones are turned away.
    pub queue_depth: usize,

    /// Largest accepted request body.
    pub max_body_bytes: usize,

    /// Overall per-request timeout.
    pub request_timeout_secs: u64,

    /// How long one body read waits for the client before giving up.
    pub body_read_wait_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            queue_depth: 8,
            max_body_bytes: 16 * 1024 * 1024,
            request_timeout_secs: 30,
            body_read_wait_ms: 100,
        }
    }
}

/// Which bus transport to drive.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-process peer that echoes proxied requests back.
    #[default]
    Simulated,
}

/// Peer bus configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    pub transport: TransportKind,

    /// Transfer clock rate in Hz.
    pub clock_hz: u32,

    /// Sleep between idle poll passes, in microseconds.
    pub idle_poll_us: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Simulated,
            clock_hz: 40_000_000,
            idle_poll_us: 200,
        }
    }
}

/// Bridge configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Wall-clock budget for one proxied exchange, in milliseconds.
    pub deadline_ms: u64,

    /// Restart the deadline every time a postdata fragment goes out.
    pub extend_deadline_on_upload: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 5000,
            extend_deadline_on_upload: false,
        }
    }
}

/// A proxied path prefix.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Route name for logging.
    pub name: String,

    /// Path prefix to match; stripped before the request goes on the bus.
    pub path_prefix: String,

    /// Restrict the route to one method.
    #[serde(default)]
    pub method: Option<String>,

    /// Opcode of the request frames.
    #[serde(default = "default_opcode")]
    pub opcode: u8,
}

fn default_opcode() -> u8 {
    0x01
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            name: "rr".to_string(),
            path_prefix: "/rr_".to_string(),
            method: None,
            opcode: default_opcode(),
        }
    }
}

/// Network operating mode reported to the peer.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Unknown,
    #[default]
    Client,
    AccessPoint,
}

/// Device identity and platform values.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub hostname: String,
    pub firmware_version: String,
    pub mode: OperatingMode,

    /// Joined network, reported in client mode.
    pub network_name: String,

    /// Own network, reported in access point mode.
    pub ap_name: String,

    /// Reported address; `None` means the listener's address.
    pub local_ip: Option<Ipv4Addr>,

    pub flash_size: u32,
    pub supply_mv: u16,
    pub reset_cause: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            hostname: "duetwifi".to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            mode: OperatingMode::Client,
            network_name: String::new(),
            ap_name: "DuetWiFi".to_string(),
            local_ip: None,
            flash_size: 4 * 1024 * 1024,
            supply_mv: 3300,
            reset_cause: 0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level when RUST_LOG is unset.
    pub log_level: String,

    pub metrics_enabled: bool,

    /// Prometheus listener address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            bus: BusConfig::default(),
            bridge: BridgeConfig::default(),
            routes: vec![RouteConfig::default()],
            device: DeviceConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
