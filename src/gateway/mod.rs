//! Gateway core: everything that runs on the poll thread.
//!
//! # Data Flow
//! ```text
//! http front end ──(queued HttpExchange)──▶ poll.rs
//!                                             ├─▶ bridge.rs ─▶ bus engine
//!                                             └─▶ status.rs ─▶ bus engine
//! ```
//!
//! # Design Decisions
//! - Single-threaded and cooperative; the bridge blocks the loop per request
//! - The engine is passed by `&mut`, never shared

pub mod bridge;
pub mod poll;
pub mod status;

pub use bridge::{Bridge, BridgeError, BridgeSettings, ProxySummary};
pub use poll::{Pass, PollLoop};
pub use status::{DeviceSensors, HostSensors, StatusPublisher, StatusRecord};
