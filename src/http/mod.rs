//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, handler)
//!     → request.rs (request ID)
//!     → exchange.rs (ChannelExchange queued to the poll loop)
//!     ← response head + streamed body chunks
//!     → Send to client
//! ```

pub mod exchange;
pub mod request;
pub mod server;

pub use exchange::{ChannelExchange, HttpExchange, ResponseHead};
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
