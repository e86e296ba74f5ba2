//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP exchange (method, path)
//!     → router.rs (ordered route scan)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: ProxyTarget (prefix, opcode) or no match
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Compile matchers (path prefix AND optional method)
//!     → Router owned by the poll loop
//! ```
//!
//! # Design Decisions
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (registration order)

pub mod matcher;
pub mod router;

pub use router::{ProxyTarget, Route, Router};
