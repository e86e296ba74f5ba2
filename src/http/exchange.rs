//! One HTTP request/response pair as seen by the bus side.
//!
//! # Responsibilities
//! - Expose the request line, client address and declared body length
//! - Hand out request body bytes on demand, bounded by a short wait
//! - Accept the response head, body chunks and the end-of-body mark
//!
//! # Data Flow
//! ```text
//! axum handler                         poll thread
//!     body stream → mpsc<Bytes>    →   read_body()
//!     oneshot<ResponseHead>        ←   open_response()
//!     unbounded mpsc<Bytes>        ←   write_chunk()
//!     (sender dropped)             ←   finish()
//! ```
//!
//! # Design Decisions
//! - The bus side is synchronous; it only ever uses the non-blocking ends
//!   of the channels
//! - Dropping an exchange without opening a response is visible to the
//!   handler as a closed oneshot

use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use tokio::sync::{mpsc, oneshot};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// Status line and entity headers of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_type: &'static str,
    pub content_length: u64,
}

/// A single in-flight HTTP exchange.
pub trait HttpExchange {
    fn method(&self) -> &str;

    /// Request path without the query.
    fn path(&self) -> &str;

    fn query(&self) -> Option<&str>;

    fn client_addr(&self) -> IpAddr;

    /// Declared request body length, `None` if the request has none.
    fn content_length(&self) -> Option<u64>;

    fn request_id(&self) -> Option<&str>;

    /// Read up to `buf.len()` body bytes. Returns 0 when nothing arrived in
    /// time or the client is gone.
    fn read_body(&mut self, buf: &mut [u8]) -> usize;

    /// Send the status line and headers.
    fn open_response(&mut self, head: ResponseHead);

    fn write_chunk(&mut self, chunk: &[u8]);

    /// Mark the end of the response body.
    fn finish(&mut self);

    /// True once nobody is left to receive the response.
    fn client_gone(&self) -> bool {
        false
    }

    /// Send a complete response in one go.
    fn respond(&mut self, status: u16, content_type: &'static str, body: &[u8]) {
        self.open_response(ResponseHead {
            status,
            content_type,
            content_length: body.len() as u64,
        });
        if !body.is_empty() {
            self.write_chunk(body);
        }
        self.finish();
    }
}

/// Request metadata captured by the front end.
#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub client_addr: IpAddr,
    pub content_length: Option<u64>,
    pub request_id: Option<String>,
}

/// Request body receiver with a bounded per-read wait.
#[derive(Debug)]
pub struct BodyReader {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
    wait: Duration,
}

impl BodyReader {
    pub fn new(rx: mpsc::Receiver<Bytes>, wait: Duration) -> Self {
        Self {
            rx,
            pending: Bytes::new(),
            wait,
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        if self.pending.is_empty() && !self.refill() {
            return 0;
        }
        let n = buf.len().min(self.pending.len());
        let chunk = self.pending.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        n
    }

    fn refill(&mut self) -> bool {
        let deadline = Instant::now() + self.wait;
        loop {
            match self.rx.try_recv() {
                Ok(chunk) if chunk.is_empty() => continue,
                Ok(chunk) => {
                    self.pending = chunk;
                    return true;
                }
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
                Err(mpsc::error::TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::yield_now();
                }
            }
        }
    }
}

/// [`HttpExchange`] backed by channels to an axum handler.
#[derive(Debug)]
pub struct ChannelExchange {
    request: RequestLine,
    body: BodyReader,
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    chunk_tx: Option<mpsc::UnboundedSender<Bytes>>,
}

impl ChannelExchange {
    pub fn new(
        request: RequestLine,
        body: BodyReader,
        head_tx: oneshot::Sender<ResponseHead>,
        chunk_tx: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            request,
            body,
            head_tx: Some(head_tx),
            chunk_tx: Some(chunk_tx),
        }
    }

    pub fn request(&self) -> &RequestLine {
        &self.request
    }
}

impl HttpExchange for ChannelExchange {
    fn method(&self) -> &str {
        &self.request.method
    }

    fn path(&self) -> &str {
        &self.request.path
    }

    fn query(&self) -> Option<&str> {
        self.request.query.as_deref()
    }

    fn client_addr(&self) -> IpAddr {
        self.request.client_addr
    }

    fn content_length(&self) -> Option<u64> {
        self.request.content_length
    }

    fn request_id(&self) -> Option<&str> {
        self.request.request_id.as_deref()
    }

    fn read_body(&mut self, buf: &mut [u8]) -> usize {
        self.body.read(buf)
    }

    fn open_response(&mut self, head: ResponseHead) {
        match self.head_tx.take() {
            Some(tx) => {
                if tx.send(head).is_err() {
                    tracing::debug!(request_id = ?self.request.request_id, "Client went away before response");
                    self.chunk_tx = None;
                }
            }
            None => tracing::warn!(
                request_id = ?self.request.request_id,
                "Response already opened"
            ),
        }
    }

    fn write_chunk(&mut self, chunk: &[u8]) {
        if self.head_tx.is_some() {
            tracing::warn!(request_id = ?self.request.request_id, "Body chunk before response head");
            return;
        }
        if let Some(tx) = &self.chunk_tx {
            if tx.send(Bytes::copy_from_slice(chunk)).is_err() {
                self.chunk_tx = None;
            }
        }
    }

    fn finish(&mut self) {
        self.chunk_tx = None;
    }

    fn client_gone(&self) -> bool {
        match &self.head_tx {
            Some(tx) => tx.is_closed(),
            None => self.chunk_tx.as_ref().map_or(true, |tx| tx.is_closed()),
        }
    }
}
