//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → main (listener, metrics) and poll loop (bus, bridge, routes, device)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → sent over a channel
//!     → poll loop applies it between passes
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Listener and metrics settings only take effect at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BridgeConfig, BusConfig, DeviceConfig, GatewayConfig, ListenerConfig, ObservabilityConfig,
    OperatingMode, RouteConfig, TransportKind,
};
pub use watcher::ConfigWatcher;
