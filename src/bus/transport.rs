//! Bus transport capability.
//!
//! # Responsibilities
//! - Shuttle 32-bit words across the half-duplex link
//! - Read the peer-ready line
//! - Drive the request-pending and bus-select lines
//! - Apply the transfer clock rate
//!
//! # Design Decisions
//! - Lines are level-polled by the engine, never interrupt-driven
//! - Word transfers may fail on real hardware; signal lines cannot

use thiserror::Error;

/// Errors raised while shuttling words.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bus transport fault: {0}")]
    Fault(String),
}

/// Word shuttle and signal lines for one physical bus.
pub trait BusTransport {
    /// Level of the peer-ready input.
    fn peer_ready(&mut self) -> bool;

    /// Drive the request-pending output (advisory wake hint for the peer).
    fn set_request_pending(&mut self, asserted: bool);

    /// Drive the bus-select output. Deasserting it marks end of frame.
    fn set_select(&mut self, asserted: bool);

    /// Set the transfer clock rate.
    fn set_clock_hz(&mut self, hz: u32);

    /// Send `out` while receiving the same number of words into `inp`.
    fn transfer(&mut self, out: &[u32], inp: &mut [u32]) -> Result<(), TransportError>;

    /// Receive words without sending anything meaningful.
    fn read(&mut self, inp: &mut [u32]) -> Result<(), TransportError>;

    /// Send words, discarding whatever comes back.
    fn write(&mut self, out: &[u32]) -> Result<(), TransportError>;
}

impl<T: BusTransport + ?Sized> BusTransport for Box<T> {
    fn peer_ready(&mut self) -> bool {
        (**self).peer_ready()
    }

    fn set_request_pending(&mut self, asserted: bool) {
        (**self).set_request_pending(asserted)
    }

    fn set_select(&mut self, asserted: bool) {
        (**self).set_select(asserted)
    }

    fn set_clock_hz(&mut self, hz: u32) {
        (**self).set_clock_hz(hz)
    }

    fn transfer(&mut self, out: &[u32], inp: &mut [u32]) -> Result<(), TransportError> {
        (**self).transfer(out, inp)
    }

    fn read(&mut self, inp: &mut [u32]) -> Result<(), TransportError> {
        (**self).read(inp)
    }

    fn write(&mut self, out: &[u32]) -> Result<(), TransportError> {
        (**self).write(out)
    }
}
