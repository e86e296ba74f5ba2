//! Bus frame: one fixed-layout exchange unit.
//!
//! Implements the 20-byte header plus bounded payload:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────┬──────────────┐
//! │ kind     │ reserved │ address  │ fragment │ length   │ payload      │
//! │ 4 bytes  │ 4 bytes  │ 4 bytes  │ 4 bytes  │ 4 bytes  │ ≤ 2048 bytes │
//! └──────────┴──────────┴──────────┴──────────┴──────────┴──────────────┘
//! ```
//!
//! The bus moves 32-bit words; every word is little-endian and the payload is
//! padded to a whole word on the wire.
//!
//! Kind word layout: byte 3 is the packet class, byte 2 holds flags
//! (bit 16 = data taken), byte 1 is unused, byte 0 is the opcode.

use std::fmt;
use thiserror::Error;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD: usize = 2048;

/// Payload size in bus words.
pub const MAX_PAYLOAD_WORDS: usize = MAX_PAYLOAD / 4;

/// Header size in bus words (kind, reserved, address, fragment, length).
pub const HEADER_WORDS: usize = 5;

/// Payload storage: the maximum plus one spare word, so a terminator always fits.
const PAYLOAD_CAPACITY: usize = MAX_PAYLOAD + 4;

/// Packet class bits of the kind word.
pub const CLASS_MASK: u32 = 0xFF00_0000;

/// Flag telling the other side its previous frame was consumed.
pub const DATA_TAKEN: u32 = 0x0001_0000;

/// Opcode bits of the kind word.
pub const OPCODE_MASK: u32 = 0x0000_00FF;

/// Packet class carried in the top byte of the kind word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketClass {
    /// A request that expects a response.
    Request = 0x3A,
    /// A response to an earlier request.
    Response = 0xB6,
    /// An informational message, no response expected.
    Info = 0x93,
}

impl PacketClass {
    /// Decode the class byte, `None` for anything unknown.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x3A => Some(Self::Request),
            0xB6 => Some(Self::Response),
            0x93 => Some(Self::Info),
            _ => None,
        }
    }

    /// The class positioned in the kind word.
    pub const fn bits(self) -> u32 {
        (self as u32) << 24
    }
}

/// Message purpose, the low byte of the kind word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u8);

impl Opcode {
    /// HTTP proxy request/response.
    pub const HTTP_PROXY: Opcode = Opcode(0x01);
    /// Network info pushed to the peer.
    pub const NETWORK_INFO: Opcode = Opcode(0x70);
    /// Peer sets the network configuration.
    pub const NETWORK_CONFIG: Opcode = Opcode(0x80);
    /// Peer enables WiFi.
    pub const NETWORK_ENABLE: Opcode = Opcode(0x81);
    /// Peer notifies that its machine configuration changed.
    pub const MACHINE_CONFIG_CHANGED: Opcode = Opcode(0x82);
    /// Peer asks for the network info record.
    pub const GET_NETWORK_INFO: Opcode = Opcode(0x83);
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// The 32-bit kind word of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageKind(u32);

impl MessageKind {
    pub const fn new(class: PacketClass, opcode: Opcode) -> Self {
        Self(class.bits() | opcode.0 as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn class(self) -> Option<PacketClass> {
        PacketClass::from_byte((self.0 >> 24) as u8)
    }

    pub const fn opcode(self) -> Opcode {
        Opcode((self.0 & OPCODE_MASK) as u8)
    }

    pub const fn data_taken(self) -> bool {
        self.0 & DATA_TAKEN != 0
    }

    /// Class and opcode only, flags and the unused byte cleared.
    pub const fn masked(self) -> Self {
        Self(self.0 & (CLASS_MASK | OPCODE_MASK))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class() {
            Some(class) => write!(f, "{:?}/{}", class, self.opcode()),
            None => write!(f, "0x{:08x}", self.0),
        }
    }
}

/// Fragment word: bits 0-30 index, bit 31 last-fragment flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fragment(u32);

impl Fragment {
    pub const LAST: u32 = 0x8000_0000;

    pub const fn new(index: u32, last: bool) -> Self {
        let index = index & !Self::LAST;
        if last {
            Self(index | Self::LAST)
        } else {
            Self(index)
        }
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> u32 {
        self.0 & !Self::LAST
    }

    pub const fn is_last(self) -> bool {
        self.0 & Self::LAST != 0
    }
}

/// Source of the payload handed to [`Frame::set_message`].
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// Copy these bytes into the frame.
    Copy(&'a [u8]),
    /// This many bytes were already written through [`Frame::buffer_for_write`].
    InPlace(usize),
}

impl Payload<'_> {
    pub fn len(&self) -> usize {
        match self {
            Payload::Copy(data) => data.len(),
            Payload::InPlace(len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a message could not be placed in a frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The slot still holds a frame nobody has consumed.
    #[error("outbound slot is occupied")]
    Occupied,

    /// The payload does not fit in one frame.
    #[error("payload of {len} bytes exceeds the {max}-byte frame limit")]
    PayloadTooLarge { len: usize, max: usize },
}

/// One frame slot.
///
/// The payload buffer is allocated once and reused for the life of the slot.
pub struct Frame {
    kind: MessageKind,
    address: u32,
    fragment: Fragment,
    length: u32,
    payload: Box<[u8; PAYLOAD_CAPACITY]>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            kind: MessageKind::default(),
            address: 0,
            fragment: Fragment::default(),
            length: 0,
            payload: Box::new([0u8; PAYLOAD_CAPACITY]),
        }
    }

    /// Mark this frame empty.
    pub fn clear(&mut self) {
        self.kind = MessageKind::default();
        self.address = 0;
        self.fragment = Fragment::default();
        self.length = 0;
    }

    /// True if this frame carries a message.
    pub fn is_ready(&self) -> bool {
        self.kind.raw() & CLASS_MASK != 0
    }

    /// True if neither class nor opcode is set; the data-taken flag is ignored.
    pub fn is_empty(&self) -> bool {
        self.kind.raw() & (CLASS_MASK | OPCODE_MASK) == 0
    }

    pub fn is_valid(&self) -> bool {
        self.is_ready() && self.length as usize <= MAX_PAYLOAD
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn fragment(&self) -> Fragment {
        self.fragment
    }

    /// Payload length as declared in the header, which may exceed the limit
    /// on a frame that has not been validated yet.
    pub fn declared_length(&self) -> u32 {
        self.length
    }

    /// The payload bytes.
    pub fn data(&self) -> &[u8] {
        let len = (self.length as usize).min(MAX_PAYLOAD);
        &self.payload[..len]
    }

    /// Set up a message in this frame.
    ///
    /// Fails without touching the frame if it is still ready.
    pub fn set_message(
        &mut self,
        kind: MessageKind,
        address: u32,
        fragment: Fragment,
        payload: Payload<'_>,
    ) -> Result<(), ScheduleError> {
        if self.is_ready() {
            return Err(ScheduleError::Occupied);
        }
        let len = payload.len();
        if len > MAX_PAYLOAD {
            return Err(ScheduleError::PayloadTooLarge {
                len,
                max: MAX_PAYLOAD,
            });
        }
        if let Payload::Copy(data) = payload {
            self.payload[..len].copy_from_slice(data);
        }
        self.kind = kind;
        self.address = address;
        self.fragment = fragment;
        self.length = len as u32;
        Ok(())
    }

    /// Writable payload region for producers that fill the frame in place.
    ///
    /// `None` while the frame still holds an unconsumed message.
    pub fn buffer_for_write(&mut self) -> Option<&mut [u8]> {
        if self.is_ready() {
            return None;
        }
        Some(&mut self.payload[..MAX_PAYLOAD])
    }

    /// Write a zero byte just past the payload.
    pub fn append_terminator(&mut self) {
        if self.is_valid() {
            self.payload[self.length as usize] = 0;
        }
    }

    pub(crate) fn header_words(&self) -> [u32; HEADER_WORDS] {
        [
            self.kind.raw(),
            0,
            self.address,
            self.fragment.raw(),
            self.length,
        ]
    }

    pub(crate) fn load_header(&mut self, words: &[u32; HEADER_WORDS]) {
        self.kind = MessageKind::from_raw(words[0]);
        self.address = words[2];
        self.fragment = Fragment::from_raw(words[3]);
        self.length = words[4];
    }

    /// Payload words this frame puts on the bus, uncapped.
    pub(crate) fn declared_payload_words(&self) -> usize {
        if self.is_ready() {
            (self.length as usize).div_ceil(4)
        } else {
            0
        }
    }

    /// Pack the first `words.len()` payload words.
    pub(crate) fn encode_payload(&self, words: &mut [u32]) {
        for (word, chunk) in words.iter_mut().zip(self.payload.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }

    /// Unpack received payload words into the buffer.
    pub(crate) fn decode_payload(&mut self, words: &[u32]) {
        for (chunk, word) in self.payload.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("address", &self.address)
            .field("fragment", &self.fragment)
            .field("length", &self.length)
            .finish()
    }
}
