//! HTTP-to-bus bridge.
//!
//! # Responsibilities
//! - Turn one HTTP request into a request frame plus postdata fragments
//! - Reassemble response fragments into a streamed HTTP response
//! - Give up after a wall-clock deadline with a canned JSON error
//!
//! # Data Flow
//! ```text
//! HttpExchange (path, query, body)
//!     → request frame: "<path minus prefix>[?query][&|?length=N]"
//!     → loop until final fragment seen and body sent, or deadline:
//!         engine.do_transaction()
//!         matching response fragment → open_response / write_chunk / finish
//!         unrelated inbound frame    → taken, ignored
//!         outbound slot free         → next postdata fragment
//! ```
//!
//! # Design Decisions
//! - Monopolizes the poll loop for the whole exchange
//! - No bus rollback on timeout; a half-sent upload is simply abandoned
//! - Response fragment 0 starts with an 8-byte preamble (status word, length)

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::bus::engine::{peer_address, TransactionEngine};
use crate::bus::frame::{MessageKind, PacketClass, ScheduleError, MAX_PAYLOAD};
use crate::bus::preamble::{ResponsePreamble, PREAMBLE_LEN};
use crate::bus::transport::BusTransport;
use crate::config::BridgeConfig;
use crate::http::exchange::{HttpExchange, ResponseHead, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT};
use crate::observability::metrics;
use crate::routing::ProxyTarget;

/// Sent when the peer does not produce a usable response in time.
pub const JSON_ERROR_BODY: &[u8] = b"{\"err\":1}";

fn content_type(preamble: &ResponsePreamble) -> &'static str {
    if preamble.json {
        CONTENT_TYPE_JSON
    } else {
        CONTENT_TYPE_TEXT
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no complete response from peer within {0:?}")]
    Timeout(Duration),

    #[error("proxied request of {len} bytes exceeds the {max}-byte frame limit")]
    RequestTooLarge { len: usize, max: usize },

    #[error("peer finished without a usable response header")]
    MalformedResponse,

    #[error("failed to schedule request frame: {0}")]
    Schedule(#[from] ScheduleError),
}

/// What a successful proxy call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxySummary {
    pub status: u16,
    pub response_fragments: u32,
    pub postdata_fragments: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    pub deadline: Duration,
    pub extend_deadline_on_upload: bool,
}

impl BridgeSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            deadline: Duration::from_millis(config.deadline_ms),
            extend_deadline_on_upload: config.extend_deadline_on_upload,
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

/// The string the peer receives in the request frame.
///
/// The prefix is stripped, the query re-attached, and a non-zero declared
/// body length is appended as a `length` parameter.
pub fn proxied_request(
    path: &str,
    prefix: &str,
    query: Option<&str>,
    content_length: Option<u64>,
) -> String {
    let mut request = path.strip_prefix(prefix).unwrap_or(path).to_string();
    let query = query.filter(|q| !q.is_empty());
    if let Some(query) = query {
        request.push('?');
        request.push_str(query);
    }
    if let Some(len) = content_length.filter(|&len| len > 0) {
        request.push(if query.is_some() { '&' } else { '?' });
        let _ = write!(request, "length={}", len);
    }
    request
}

/// Progress of one proxied exchange.
struct ProxyContext {
    expected: MessageKind,
    opened: Option<u16>,
    complete: bool,
    response_fragments: u32,
}

impl ProxyContext {
    fn accept<E: HttpExchange + ?Sized>(
        &mut self,
        exchange: &mut E,
        index: u32,
        last: bool,
        data: &[u8],
    ) {
        self.response_fragments += 1;
        if index == 0 {
            match ResponsePreamble::decode(data) {
                Some(preamble) if self.opened.is_none() => {
                    exchange.open_response(ResponseHead {
                        status: preamble.status,
                        content_type: content_type(&preamble),
                        content_length: u64::from(preamble.content_length),
                    });
                    let body = &data[PREAMBLE_LEN..];
                    if !body.is_empty() {
                        exchange.write_chunk(body);
                    }
                    self.opened = Some(preamble.status);
                }
                Some(_) => tracing::warn!(
                    request_id = ?exchange.request_id(),
                    "Duplicate response header fragment dropped"
                ),
                None => tracing::warn!(
                    request_id = ?exchange.request_id(),
                    length = data.len(),
                    "Response header fragment too short, dropped"
                ),
            }
        } else if self.opened.is_some() {
            exchange.write_chunk(data);
        } else {
            tracing::warn!(
                request_id = ?exchange.request_id(),
                fragment = index,
                "Response body fragment before header, dropped"
            );
        }

        if last && !self.complete {
            self.complete = true;
            if self.opened.is_some() {
                exchange.finish();
            }
        }
    }
}

/// Runs proxied exchanges against the engine.
#[derive(Debug, Clone, Default)]
pub struct Bridge {
    settings: BridgeSettings,
}

impl Bridge {
    pub fn new(settings: BridgeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> BridgeSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: BridgeSettings) {
        self.settings = settings;
    }

    /// Forward one HTTP exchange over the bus and stream back the reply.
    pub fn proxy<T, E>(
        &self,
        engine: &mut TransactionEngine<T>,
        exchange: &mut E,
        target: &ProxyTarget,
    ) -> Result<ProxySummary, BridgeError>
    where
        T: BusTransport,
        E: HttpExchange + ?Sized,
    {
        let start = Instant::now();
        let content_length = exchange.content_length();
        let request = proxied_request(exchange.path(), &target.prefix, exchange.query(), content_length);

        if request.len() > MAX_PAYLOAD {
            tracing::warn!(
                request_id = ?exchange.request_id(),
                length = request.len(),
                "Proxied request does not fit in one frame"
            );
            send_json_error(exchange, start);
            return Err(BridgeError::RequestTooLarge {
                len: request.len(),
                max: MAX_PAYLOAD,
            });
        }

        tracing::debug!(
            request_id = ?exchange.request_id(),
            request = %request,
            opcode = %target.opcode,
            "Proxying request over bus"
        );

        let address = peer_address(exchange.client_addr());
        let mut post_remaining = content_length.unwrap_or(0);
        let mut request_scheduled = false;
        let mut next_fragment = 1u32;
        let mut deadline = start + self.settings.deadline;
        let mut ctx = ProxyContext {
            expected: MessageKind::new(PacketClass::Response, target.opcode),
            opened: None,
            complete: false,
            response_fragments: 0,
        };

        loop {
            if !request_scheduled {
                match engine.schedule_request(
                    target.opcode,
                    address,
                    post_remaining == 0,
                    request.as_bytes(),
                ) {
                    Ok(()) => request_scheduled = true,
                    Err(ScheduleError::Occupied) => {}
                    Err(e) => {
                        send_json_error(exchange, start);
                        return Err(e.into());
                    }
                }
            }

            engine.do_transaction();

            if engine.data_ready() {
                let kind = engine.kind();
                if kind == ctx.expected {
                    let (index, last) = engine.fragment_info();
                    ctx.accept(exchange, index, last, engine.data());
                } else {
                    tracing::debug!(kind = %kind, "Discarding unrelated frame during proxy");
                }
                engine.take_incoming_data();
            }

            let mut sent_postdata = false;
            if request_scheduled && post_remaining > 0 {
                if let Some(buf) = engine.claim_outbound_buffer() {
                    let want = buf.len().min(usize::try_from(post_remaining).unwrap_or(usize::MAX));
                    let n = exchange.read_body(&mut buf[..want]);
                    if n > 0 {
                        post_remaining -= n as u64;
                        let last = post_remaining == 0;
                        match engine.schedule_postdata(target.opcode, address, n, next_fragment, last) {
                            Ok(()) => {
                                tracing::trace!(
                                    fragment = next_fragment,
                                    bytes = n,
                                    remaining = post_remaining,
                                    "Postdata fragment scheduled"
                                );
                                next_fragment += 1;
                                sent_postdata = true;
                                if self.settings.extend_deadline_on_upload {
                                    deadline = Instant::now() + self.settings.deadline;
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "Failed to schedule postdata"),
                        }
                    } else {
                        tracing::debug!(remaining = post_remaining, "Read 0 bytes of postdata");
                    }
                }
            }
            if !sent_postdata {
                std::thread::yield_now();
            }

            if ctx.complete && post_remaining == 0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(self.timed_out(exchange, &ctx, start));
            }
        }

        let Some(status) = ctx.opened else {
            tracing::warn!(
                request_id = ?exchange.request_id(),
                "Peer finished without a response header"
            );
            send_json_error(exchange, start);
            return Err(BridgeError::MalformedResponse);
        };

        let elapsed = start.elapsed();
        metrics::record_bridge_request(status, start);
        tracing::info!(
            request_id = ?exchange.request_id(),
            status,
            fragments = ctx.response_fragments,
            postdata_fragments = next_fragment - 1,
            elapsed_ms = elapsed.as_millis() as u64,
            "Proxied request completed"
        );

        Ok(ProxySummary {
            status,
            response_fragments: ctx.response_fragments,
            postdata_fragments: next_fragment - 1,
            elapsed,
        })
    }

    fn timed_out<E: HttpExchange + ?Sized>(
        &self,
        exchange: &mut E,
        ctx: &ProxyContext,
        start: Instant,
    ) -> BridgeError {
        tracing::warn!(
            request_id = ?exchange.request_id(),
            deadline_ms = self.settings.deadline.as_millis() as u64,
            response_opened = ctx.opened.is_some(),
            "Bus exchange timed out"
        );
        metrics::record_bridge_timeout();
        match ctx.opened {
            Some(status) => {
                exchange.finish();
                metrics::record_bridge_request(status, start);
            }
            None => send_json_error(exchange, start),
        }
        BridgeError::Timeout(start.elapsed())
    }
}

fn send_json_error<E: HttpExchange + ?Sized>(exchange: &mut E, start: Instant) {
    exchange.respond(200, CONTENT_TYPE_JSON, JSON_ERROR_BODY);
    metrics::record_bridge_request(200, start);
}
