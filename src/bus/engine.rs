//! Transaction engine.
//!
//! # Exchange Sequence
//! ```text
//! peer-ready && inbound empty?
//!     → assert select, drop request-pending
//!     → header words: out ⇄ in
//!     → min(in, out) payload words: out ⇄ in
//!     → remaining inbound words: read only (capped at MAX_PAYLOAD)
//!     → remaining outbound words: write only
//!     → deassert select (end of frame)
//!     → validate inbound, clear outbound
//! ```
//!
//! # Design Decisions
//! - Exactly two slots; ownership moves by convention, no locks
//! - Outbound slot is cleared after every exchange whether or not the peer
//!   flagged it as taken
//! - An over-length inbound frame is dropped before anyone can see it

use std::net::IpAddr;

use crate::bus::frame::{
    Fragment, Frame, MessageKind, Opcode, PacketClass, Payload, ScheduleError, HEADER_WORDS,
    MAX_PAYLOAD_WORDS,
};
use crate::bus::transport::{BusTransport, TransportError};
use crate::observability::metrics;

/// Default transfer clock rate.
pub const DEFAULT_CLOCK_HZ: u32 = 40_000_000;

/// Outcome of one [`TransactionEngine::do_transaction`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// Peer not ready, or the inbound slot still holds unconsumed data.
    Skipped,
    /// Frame boundary reached.
    Completed {
        /// An outbound message went out in this exchange.
        sent: bool,
        /// Kind of the valid frame now waiting in the inbound slot.
        received: Option<MessageKind>,
    },
    /// The peer declared a payload longer than the limit; the frame was dropped.
    Rejected { declared_length: u32 },
    /// The transport failed mid-exchange.
    Faulted,
}

impl Exchange {
    pub fn label(&self) -> &'static str {
        match self {
            Exchange::Skipped => "skipped",
            Exchange::Completed { .. } => "completed",
            Exchange::Rejected { .. } => "rejected",
            Exchange::Faulted => "faulted",
        }
    }
}

/// Running counters kept by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub exchanges: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub faults: u64,
}

/// Owns both frame slots and the transport of the one physical bus.
pub struct TransactionEngine<T> {
    transport: T,
    inbound: Frame,
    outbound: Frame,
    clock_hz: u32,
    tx_words: Vec<u32>,
    rx_words: Vec<u32>,
    stats: EngineStats,
}

impl<T: BusTransport> TransactionEngine<T> {
    /// Initialise the lines and clear both slots.
    pub fn new(mut transport: T, clock_hz: u32) -> Self {
        transport.set_request_pending(false);
        transport.set_select(false);
        transport.set_clock_hz(clock_hz);

        tracing::debug!(clock_hz, "Bus transaction engine initialised");

        Self {
            transport,
            inbound: Frame::new(),
            outbound: Frame::new(),
            clock_hz,
            tx_words: vec![0; MAX_PAYLOAD_WORDS],
            rx_words: vec![0; MAX_PAYLOAD_WORDS],
            stats: EngineStats::default(),
        }
    }

    /// Execute one bus exchange if the peer is ready and the inbound slot is free.
    pub fn do_transaction(&mut self) -> Exchange {
        if !self.transport.peer_ready() || !self.inbound.is_empty() {
            return Exchange::Skipped;
        }

        let sending = self.outbound.is_ready();
        if sending {
            tracing::trace!(
                kind = %self.outbound.kind(),
                fragment = self.outbound.fragment().index(),
                length = self.outbound.declared_length(),
                "Sending frame"
            );
        }

        self.transport.set_select(true);
        self.transport.set_request_pending(false);
        let result = self.shuttle();
        self.transport.set_select(false);

        self.stats.exchanges += 1;
        let outcome = match result {
            Err(e) => {
                tracing::warn!(error = %e, "Bus exchange faulted");
                self.inbound.clear();
                self.stats.faults += 1;
                Exchange::Faulted
            }
            Ok(()) => {
                if sending {
                    self.stats.frames_sent += 1;
                }
                self.accept_inbound(sending)
            }
        };

        self.outbound.clear();
        metrics::record_exchange(outcome.label());
        outcome
    }

    fn shuttle(&mut self) -> Result<(), TransportError> {
        let out_header = self.outbound.header_words();
        let mut in_header = [0u32; HEADER_WORDS];
        self.transport.transfer(&out_header, &mut in_header)?;
        self.inbound.load_header(&in_header);

        let out_len = self.outbound.declared_payload_words().min(MAX_PAYLOAD_WORDS);
        let in_len = self.inbound.declared_payload_words().min(MAX_PAYLOAD_WORDS);
        self.outbound.encode_payload(&mut self.tx_words[..out_len]);

        let both = in_len.min(out_len);
        if both != 0 {
            self.transport
                .transfer(&self.tx_words[..both], &mut self.rx_words[..both])?;
        }
        if in_len > both {
            self.transport.read(&mut self.rx_words[both..in_len])?;
        }
        if out_len > both {
            self.transport.write(&self.tx_words[both..out_len])?;
        }

        self.inbound.decode_payload(&self.rx_words[..in_len]);
        Ok(())
    }

    fn accept_inbound(&mut self, sent: bool) -> Exchange {
        if !self.inbound.is_ready() {
            // Stray opcode bits without a class would latch the slot forever.
            self.inbound.clear();
            return Exchange::Completed {
                sent,
                received: None,
            };
        }

        if self.inbound.is_valid() {
            self.inbound.append_terminator();
            self.stats.frames_received += 1;
            tracing::debug!(
                kind = %self.inbound.kind(),
                fragment = self.inbound.fragment().index(),
                last = self.inbound.fragment().is_last(),
                length = self.inbound.declared_length(),
                "Frame received"
            );
            return Exchange::Completed {
                sent,
                received: Some(self.inbound.kind().masked()),
            };
        }

        let header = self.inbound.header_words();
        let declared_length = self.inbound.declared_length();
        tracing::warn!(
            header = ?header,
            declared_length,
            "Dropping over-length frame from peer"
        );
        self.inbound.clear();
        self.stats.frames_rejected += 1;
        metrics::record_frame_rejected();
        Exchange::Rejected { declared_length }
    }

    /// Schedule an informational message.
    pub fn schedule_info(&mut self, opcode: Opcode, data: &[u8]) -> Result<(), ScheduleError> {
        self.schedule(
            MessageKind::new(PacketClass::Info, opcode),
            0,
            Fragment::new(0, true),
            Payload::Copy(data),
        )
    }

    /// Schedule a request message (fragment 0).
    pub fn schedule_request(
        &mut self,
        opcode: Opcode,
        address: u32,
        last: bool,
        data: &[u8],
    ) -> Result<(), ScheduleError> {
        self.schedule(
            MessageKind::new(PacketClass::Request, opcode),
            address,
            Fragment::new(0, last),
            Payload::Copy(data),
        )
    }

    /// Schedule a reply to a peer request.
    pub fn schedule_reply(&mut self, opcode: Opcode, data: &[u8]) -> Result<(), ScheduleError> {
        self.schedule(
            MessageKind::new(PacketClass::Response, opcode),
            0,
            Fragment::new(0, true),
            Payload::Copy(data),
        )
    }

    /// Schedule `length` bytes already written through [`claim_outbound_buffer`].
    ///
    /// [`claim_outbound_buffer`]: TransactionEngine::claim_outbound_buffer
    pub fn schedule_postdata(
        &mut self,
        opcode: Opcode,
        address: u32,
        length: usize,
        fragment: u32,
        last: bool,
    ) -> Result<(), ScheduleError> {
        self.schedule(
            MessageKind::new(PacketClass::Request, opcode),
            address,
            Fragment::new(fragment, last),
            Payload::InPlace(length),
        )
    }

    fn schedule(
        &mut self,
        kind: MessageKind,
        address: u32,
        fragment: Fragment,
        payload: Payload<'_>,
    ) -> Result<(), ScheduleError> {
        match self.outbound.set_message(kind, address, fragment, payload) {
            Ok(()) => {
                if self.inbound.is_empty() {
                    self.transport.set_request_pending(true);
                }
                Ok(())
            }
            Err(e) => {
                metrics::record_schedule_rejected(kind);
                Err(e)
            }
        }
    }

    /// Writable outbound payload region, `None` while a message is pending.
    pub fn claim_outbound_buffer(&mut self) -> Option<&mut [u8]> {
        self.outbound.buffer_for_write()
    }

    /// True if an outbound message is waiting for the next exchange.
    pub fn outbound_pending(&self) -> bool {
        self.outbound.is_ready()
    }

    /// True if a received frame is waiting to be consumed.
    pub fn data_ready(&self) -> bool {
        self.inbound.is_ready()
    }

    /// Class and opcode of the received frame.
    pub fn kind(&self) -> MessageKind {
        self.inbound.kind().masked()
    }

    /// Fragment index of the received frame and whether it is the last one.
    pub fn fragment_info(&self) -> (u32, bool) {
        let fragment = self.inbound.fragment();
        (fragment.index(), fragment.is_last())
    }

    /// Sender address of the received frame.
    pub fn address(&self) -> u32 {
        self.inbound.address()
    }

    pub fn data(&self) -> &[u8] {
        self.inbound.data()
    }

    /// Release the inbound slot.
    pub fn take_incoming_data(&mut self) {
        self.inbound.clear();
        if self.outbound.is_ready() {
            self.transport.set_request_pending(true);
        }
    }

    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    /// Change the transfer clock rate; takes effect on the next exchange.
    pub fn set_clock_hz(&mut self, hz: u32) {
        if hz != self.clock_hz {
            tracing::info!(from = self.clock_hz, to = hz, "Bus clock rate changed");
            self.clock_hz = hz;
            self.transport.set_clock_hz(hz);
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// Encode a client address for the frame address field.
///
/// IPv4 octets keep network order on the wire; IPv4-mapped IPv6 is unwrapped
/// and anything else becomes 0.
pub fn peer_address(ip: IpAddr) -> u32 {
    let v4 = match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    };
    v4.map(|v4| u32::from_le_bytes(v4.octets())).unwrap_or(0)
}
