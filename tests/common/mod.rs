//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use bus_gateway::bus::{
    proxy_reply, BusTransport, EngineStats, MessageKind, Opcode, PacketClass, PeerFrame,
    SimulatedPeer, TransactionEngine, DEFAULT_CLOCK_HZ,
};
use bus_gateway::config::GatewayConfig;
use bus_gateway::http::exchange::{HttpExchange, ResponseHead};
use bus_gateway::http::{ChannelExchange, HttpServer};
use bus_gateway::lifecycle::{startup, Shutdown};

/// What the bridge sent back to the client.
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    pub head: Option<ResponseHead>,
    pub body: Vec<u8>,
    pub chunks: usize,
    pub finished: bool,
}

/// In-memory HTTP exchange.
pub struct MockExchange {
    method: String,
    path: String,
    query: Option<String>,
    client_addr: IpAddr,
    content_length: Option<u64>,
    body: Vec<u8>,
    read_pos: usize,
    read_delay: Duration,
    gone: bool,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockExchange {
    pub fn get(path: &str) -> Self {
        Self {
            method: "GET".into(),
            path: path.into(),
            query: None,
            client_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            content_length: None,
            body: Vec::new(),
            read_pos: 0,
            read_delay: Duration::ZERO,
            gone: false,
            recorded: Arc::default(),
        }
    }

    pub fn post(path: &str, body: Vec<u8>) -> Self {
        Self {
            method: "POST".into(),
            content_length: Some(body.len() as u64),
            body,
            ..Self::get(path)
        }
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_client(mut self, addr: IpAddr) -> Self {
        self.client_addr = addr;
        self
    }

    /// Stall every body read by `delay`, like a slow uploader.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Client already disconnected.
    pub fn abandoned(mut self) -> Self {
        self.gone = true;
        self
    }

    /// Handle that stays readable after the exchange moves into a queue.
    pub fn recorder(&self) -> Arc<Mutex<Recorded>> {
        self.recorded.clone()
    }

    pub fn response(&self) -> Recorded {
        self.recorded.lock().unwrap().clone()
    }
}

impl HttpExchange for MockExchange {
    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn client_addr(&self) -> IpAddr {
        self.client_addr
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn request_id(&self) -> Option<&str> {
        Some("test-request")
    }

    fn read_body(&mut self, buf: &mut [u8]) -> usize {
        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }
        let rest = &self.body[self.read_pos..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.read_pos += n;
        n
    }

    fn open_response(&mut self, head: ResponseHead) {
        let mut recorded = self.recorded.lock().unwrap();
        assert!(recorded.head.is_none(), "response opened twice");
        recorded.head = Some(head);
    }

    fn write_chunk(&mut self, chunk: &[u8]) {
        let mut recorded = self.recorded.lock().unwrap();
        assert!(recorded.head.is_some(), "chunk before head");
        assert!(!recorded.finished, "chunk after finish");
        recorded.body.extend_from_slice(chunk);
        recorded.chunks += 1;
    }

    fn finish(&mut self) {
        self.recorded.lock().unwrap().finished = true;
    }

    fn client_gone(&self) -> bool {
        self.gone
    }
}

pub fn proxy_request_kind() -> MessageKind {
    MessageKind::new(PacketClass::Request, Opcode::HTTP_PROXY)
}

/// A peer that answers the final fragment of every proxied request with `reply`.
pub fn replying_peer(reply: Vec<PeerFrame>) -> SimulatedPeer {
    SimulatedPeer::with_responder(Box::new(move |frame: &PeerFrame| {
        if frame.kind == proxy_request_kind() && frame.fragment.is_last() {
            reply.clone()
        } else {
            Vec::new()
        }
    }))
}

/// A peer that answers every proxied request with `status` and `body`.
pub fn text_peer(status: u16, body: &[u8]) -> SimulatedPeer {
    replying_peer(proxy_reply(status, false, body))
}

pub fn engine<T: BusTransport>(transport: T) -> TransactionEngine<T> {
    TransactionEngine::new(transport, DEFAULT_CLOCK_HZ)
}

/// A full gateway on an ephemeral port, backed by `peer`.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    poll_thread: Option<JoinHandle<EngineStats>>,
    server: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl TestGateway {
    pub async fn start(mut config: GatewayConfig, peer: SimulatedPeer) -> Self {
        config.listener.bind_address = "127.0.0.1:0".into();
        let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let (queue_tx, queue_rx) = mpsc::channel::<ChannelExchange>(config.listener.queue_depth);
        let poll_thread = startup::spawn_poll_loop(
            peer,
            &config,
            startup::reported_ip(addr),
            queue_rx,
            None,
            shutdown.subscribe(),
        )
        .unwrap();

        let server = HttpServer::new(config.listener.clone(), queue_tx);
        let server = tokio::spawn(server.run(listener, shutdown.subscribe()));

        Self {
            addr,
            shutdown,
            poll_thread: Some(poll_thread),
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop both halves and return the engine counters.
    pub async fn stop(mut self) -> EngineStats {
        self.shutdown.trigger();
        self.server.await.unwrap().unwrap();
        let poll_thread = self.poll_thread.take().unwrap();
        tokio::task::spawn_blocking(move || poll_thread.join().unwrap())
            .await
            .unwrap()
    }
}
