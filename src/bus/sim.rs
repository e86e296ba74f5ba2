//! In-process stand-in for the peer controller.
//!
//! # Responsibilities
//! - Implement [`BusTransport`] without hardware
//! - Play back queued frames, one per exchange
//! - Record every frame the engine sends
//! - Optionally answer received frames through a responder closure
//!
//! # Data Flow
//! ```text
//! select asserted   → next queued frame becomes the outgoing word stream
//! transfer/read     → words popped from that stream (zero once exhausted)
//! transfer/write    → words appended to the received stream
//! select deasserted → received words parsed, recorded, handed to responder
//! ```

use std::collections::VecDeque;

use crate::bus::frame::{Fragment, MessageKind, Opcode, PacketClass, HEADER_WORDS, MAX_PAYLOAD};
use crate::bus::preamble::{ResponsePreamble, PREAMBLE_LEN};
use crate::bus::transport::{BusTransport, TransportError};

/// A frame as seen from the peer side of the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFrame {
    pub kind: MessageKind,
    pub address: u32,
    pub fragment: Fragment,
    pub payload: Vec<u8>,
}

impl PeerFrame {
    pub fn new(kind: MessageKind, fragment: Fragment, payload: Vec<u8>) -> Self {
        Self {
            kind,
            address: 0,
            fragment,
            payload,
        }
    }

    /// A response-class frame.
    pub fn response(opcode: Opcode, fragment: Fragment, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(
            MessageKind::new(PacketClass::Response, opcode),
            fragment,
            payload.into(),
        )
    }

    /// A single-fragment request-class frame.
    pub fn request(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(
            MessageKind::new(PacketClass::Request, opcode),
            Fragment::new(0, true),
            payload.into(),
        )
    }

    /// Header plus word-padded payload.
    pub fn to_words(&self) -> Vec<u32> {
        let mut words = vec![
            self.kind.raw(),
            0,
            self.address,
            self.fragment.raw(),
            self.payload.len() as u32,
        ];
        words.extend(self.payload.chunks(4).map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        }));
        words
    }

    /// Parse the words the engine clocked out; `None` for an empty frame.
    pub fn from_words(words: &[u32]) -> Option<Self> {
        if words.len() < HEADER_WORDS {
            return None;
        }
        let kind = MessageKind::from_raw(words[0]);
        kind.class()?;

        let length = (words[4] as usize).min(MAX_PAYLOAD);
        let mut payload: Vec<u8> = words[HEADER_WORDS..]
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect();
        payload.truncate(length);

        Some(Self {
            kind,
            address: words[2],
            fragment: Fragment::from_raw(words[3]),
            payload,
        })
    }
}

/// Produces the frames the peer queues in answer to one it received.
pub type Responder = Box<dyn FnMut(&PeerFrame) -> Vec<PeerFrame> + Send>;

/// Simulated peer controller.
pub struct SimulatedPeer {
    ready: bool,
    request_pending: bool,
    selected: bool,
    clock_hz: u32,
    outgoing: VecDeque<PeerFrame>,
    tx: VecDeque<u32>,
    rx: Vec<u32>,
    received: Vec<PeerFrame>,
    exchanges: u64,
    fail_next: bool,
    responder: Option<Responder>,
}

impl SimulatedPeer {
    /// A peer that is always ready and never answers on its own.
    pub fn new() -> Self {
        Self {
            ready: true,
            request_pending: false,
            selected: false,
            clock_hz: 0,
            outgoing: VecDeque::new(),
            tx: VecDeque::new(),
            rx: Vec::new(),
            received: Vec::new(),
            exchanges: 0,
            fail_next: false,
            responder: None,
        }
    }

    pub fn with_responder(responder: Responder) -> Self {
        Self {
            responder: Some(responder),
            ..Self::new()
        }
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Queue a frame for the next exchange.
    pub fn queue(&mut self, frame: PeerFrame) {
        self.outgoing.push_back(frame);
    }

    pub fn pending_outgoing(&self) -> usize {
        self.outgoing.len()
    }

    /// Frames received from the engine, oldest first.
    pub fn received(&self) -> &[PeerFrame] {
        &self.received
    }

    pub fn take_received(&mut self) -> Vec<PeerFrame> {
        std::mem::take(&mut self.received)
    }

    /// Completed select cycles.
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    pub fn request_pending(&self) -> bool {
        self.request_pending
    }

    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    /// Make the next word transfer fail.
    pub fn fail_next_transfer(&mut self) {
        self.fail_next = true;
    }

    fn begin_frame(&mut self) {
        self.tx.clear();
        self.rx.clear();
        if let Some(frame) = self.outgoing.pop_front() {
            self.tx.extend(frame.to_words());
        }
    }

    fn end_frame(&mut self) {
        self.exchanges += 1;
        self.tx.clear();
        let Some(frame) = PeerFrame::from_words(&self.rx) else {
            return;
        };
        if let Some(responder) = self.responder.as_mut() {
            let replies = responder(&frame);
            self.outgoing.extend(replies);
        }
        self.received.push(frame);
    }

    fn check_fault(&mut self) -> Result<(), TransportError> {
        if !self.selected {
            return Err(TransportError::Fault("transfer without bus select".into()));
        }
        if std::mem::take(&mut self.fail_next) {
            return Err(TransportError::Fault("injected transfer failure".into()));
        }
        Ok(())
    }
}

impl Default for SimulatedPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl BusTransport for SimulatedPeer {
    fn peer_ready(&mut self) -> bool {
        self.ready
    }

    fn set_request_pending(&mut self, asserted: bool) {
        self.request_pending = asserted;
    }

    fn set_select(&mut self, asserted: bool) {
        match (self.selected, asserted) {
            (false, true) => self.begin_frame(),
            (true, false) => self.end_frame(),
            _ => {}
        }
        self.selected = asserted;
    }

    fn set_clock_hz(&mut self, hz: u32) {
        self.clock_hz = hz;
    }

    fn transfer(&mut self, out: &[u32], inp: &mut [u32]) -> Result<(), TransportError> {
        self.check_fault()?;
        self.rx.extend_from_slice(out);
        for word in inp.iter_mut() {
            *word = self.tx.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    fn read(&mut self, inp: &mut [u32]) -> Result<(), TransportError> {
        self.check_fault()?;
        for word in inp.iter_mut() {
            self.rx.push(0);
            *word = self.tx.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    fn write(&mut self, out: &[u32]) -> Result<(), TransportError> {
        self.check_fault()?;
        self.rx.extend_from_slice(out);
        for _ in out {
            self.tx.pop_front();
        }
        Ok(())
    }
}

/// Split an HTTP-proxy reply into response frames, preamble in fragment 0.
pub fn proxy_reply(status: u16, json: bool, body: &[u8]) -> Vec<PeerFrame> {
    let preamble = ResponsePreamble {
        status,
        json,
        keep_open: false,
        content_length: body.len() as u32,
    };

    let mut first = preamble.encode().to_vec();
    let head_len = body.len().min(MAX_PAYLOAD - PREAMBLE_LEN);
    first.extend_from_slice(&body[..head_len]);

    let mut slices = vec![first];
    slices.extend(body[head_len..].chunks(MAX_PAYLOAD).map(<[u8]>::to_vec));

    let count = slices.len();
    slices
        .into_iter()
        .enumerate()
        .map(|(index, payload)| {
            PeerFrame::response(
                Opcode::HTTP_PROXY,
                Fragment::new(index as u32, index + 1 == count),
                payload,
            )
        })
        .collect()
}

/// A responder that answers every proxied request with a JSON summary of it.
///
/// Postdata fragments are counted; the reply goes out once the request's last
/// fragment has been received.
pub fn echo_responder() -> Responder {
    let mut request = String::new();
    let mut post_bytes = 0usize;

    Box::new(move |frame: &PeerFrame| {
        if frame.kind != MessageKind::new(PacketClass::Request, Opcode::HTTP_PROXY) {
            return Vec::new();
        }
        if frame.fragment.index() == 0 {
            request = String::from_utf8_lossy(&frame.payload).into_owned();
            post_bytes = 0;
        } else {
            post_bytes += frame.payload.len();
        }
        if !frame.fragment.is_last() {
            return Vec::new();
        }

        let body = serde_json::json!({
            "err": 0,
            "request": request,
            "postBytes": post_bytes,
        });
        proxy_reply(200, true, body.to_string().as_bytes())
    })
}
