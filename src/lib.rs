//! HTTP-to-bus gateway library.

pub mod bus;
pub mod config;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;

pub use bus::TransactionEngine;
pub use config::GatewayConfig;
pub use gateway::PollLoop;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
