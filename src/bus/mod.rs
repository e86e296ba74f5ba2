//! Peer bus subsystem.
//!
//! # Data Flow
//! ```text
//! Bridge / Status Publisher / Poll Loop
//!     → engine.rs (two frame slots, exchange sequence)
//!     → frame.rs (header + payload layout)
//!     → preamble.rs (proxy response head)
//!     → transport.rs (word shuttle, signal lines)
//!     → sim.rs (in-process peer) or real hardware
//! ```
//!
//! # Design Decisions
//! - One owned engine value, passed explicitly, single-threaded
//! - Frame slots are the only hand-off; scheduling fails instead of queuing

pub mod engine;
pub mod frame;
pub mod preamble;
pub mod sim;
pub mod transport;

pub use engine::{peer_address, EngineStats, Exchange, TransactionEngine, DEFAULT_CLOCK_HZ};
pub use frame::{
    Fragment, Frame, MessageKind, Opcode, PacketClass, Payload, ScheduleError, MAX_PAYLOAD,
};
pub use preamble::{ResponsePreamble, PREAMBLE_LEN};
pub use sim::{echo_responder, proxy_reply, PeerFrame, SimulatedPeer};
pub use transport::{BusTransport, TransportError};
