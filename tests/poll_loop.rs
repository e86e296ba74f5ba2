//! Poll loop passes: peer-originated messages, routing and reloads.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use bus_gateway::bus::{
    Exchange, Fragment, MessageKind, Opcode, PacketClass, PeerFrame, SimulatedPeer,
};
use bus_gateway::config::{DeviceConfig, GatewayConfig, RouteConfig};
use bus_gateway::gateway::status::STATUS_RECORD_LEN;
use bus_gateway::gateway::{PollLoop, StatusPublisher};
use bus_gateway::http::exchange::{BodyReader, RequestLine};
use bus_gateway::http::ChannelExchange;
use bus_gateway::lifecycle::Shutdown;

mod common;
use common::{engine, proxy_request_kind, text_peer, MockExchange};

fn poll_loop(
    peer: SimulatedPeer,
    config: &GatewayConfig,
) -> (PollLoop<SimulatedPeer, MockExchange>, mpsc::Sender<MockExchange>) {
    let (tx, rx) = mpsc::channel(config.listener.queue_depth);
    let status = StatusPublisher::from_config(&config.device, Ipv4Addr::new(192, 168, 1, 14));
    let poll_loop = PollLoop::new(engine(peer), config, status, rx);
    (poll_loop, tx)
}

#[test]
fn test_get_network_info_is_answered() {
    let mut peer = SimulatedPeer::new();
    peer.queue(PeerFrame::request(Opcode::GET_NETWORK_INFO, Vec::new()));
    let (mut poll_loop, _tx) = poll_loop(peer, &GatewayConfig::default());

    let first = poll_loop.run_once();
    assert_eq!(first.peer_message, Some(Opcode::GET_NETWORK_INFO));
    assert!(!poll_loop.engine().data_ready());
    assert!(poll_loop.engine().outbound_pending());
    assert!(poll_loop.engine().transport().request_pending());

    let second = poll_loop.run_once();
    assert_eq!(
        second.exchange,
        Exchange::Completed {
            sent: true,
            received: None
        }
    );

    let reply = &poll_loop.engine().transport().received()[0];
    assert_eq!(
        reply.kind,
        MessageKind::new(PacketClass::Response, Opcode::GET_NETWORK_INFO)
    );
    assert_eq!(reply.payload.len(), STATUS_RECORD_LEN);
    assert_eq!(&reply.payload[4..8], &[192, 168, 1, 14]);
}

#[test]
fn test_unknown_peer_message_is_discarded() {
    let mut peer = SimulatedPeer::new();
    peer.queue(PeerFrame::new(
        MessageKind::new(PacketClass::Info, Opcode(0x42)),
        Fragment::new(0, true),
        b"whatever".to_vec(),
    ));
    peer.queue(PeerFrame::request(Opcode::MACHINE_CONFIG_CHANGED, Vec::new()));
    let (mut poll_loop, _tx) = poll_loop(peer, &GatewayConfig::default());

    let pass = poll_loop.run_once();
    assert_eq!(pass.peer_message, Some(Opcode(0x42)));
    assert!(!pass.is_idle());
    assert!(!poll_loop.engine().data_ready());

    let pass = poll_loop.run_once();
    assert_eq!(pass.peer_message, Some(Opcode::MACHINE_CONFIG_CHANGED));
    assert!(!poll_loop.engine().outbound_pending());

    let pass = poll_loop.run_once();
    assert!(pass.is_idle());
    assert!(poll_loop.engine().transport().received().is_empty());
}

#[test]
fn test_queued_request_is_proxied() {
    let (mut poll_loop, tx) = poll_loop(text_peer(200, b"hello world"), &GatewayConfig::default());

    let exchange = MockExchange::get("/rr_status").with_query("type=1");
    let recorder = exchange.recorder();
    tx.try_send(exchange).unwrap();

    let pass = poll_loop.run_once();
    assert!(pass.serviced_client);

    let response = recorder.lock().unwrap().clone();
    assert_eq!(response.head.unwrap().status, 200);
    assert_eq!(response.body, b"hello world");
    assert!(response.finished);

    let sent = poll_loop.engine().transport().received();
    assert_eq!(sent[0].kind, proxy_request_kind());
    assert_eq!(sent[0].payload, b"status?type=1");
}

#[test]
fn test_unrouted_path_gets_json_404() {
    let (mut poll_loop, tx) = poll_loop(SimulatedPeer::new(), &GatewayConfig::default());

    let exchange = MockExchange::get("/index.html");
    let recorder = exchange.recorder();
    tx.try_send(exchange).unwrap();

    assert!(poll_loop.run_once().serviced_client);

    let response = recorder.lock().unwrap().clone();
    let head = response.head.unwrap();
    assert_eq!(head.status, 404);
    assert_eq!(head.content_type, "application/json");
    assert_eq!(response.body, b"{\"err\": \"404: /index.html NOT FOUND\"}");
    assert!(response.finished);
    assert!(poll_loop.engine().transport().received().is_empty());
}

#[test]
fn test_abandoned_request_never_reaches_bus() {
    let (mut poll_loop, tx) = poll_loop(text_peer(200, b"ok"), &GatewayConfig::default());

    let exchange = MockExchange::get("/rr_gcode").with_query("gcode=M112").abandoned();
    let recorder = exchange.recorder();
    tx.try_send(exchange).unwrap();

    let pass = poll_loop.run_once();
    assert!(pass.serviced_client);
    assert!(recorder.lock().unwrap().head.is_none());

    poll_loop.run_once();
    assert!(poll_loop.engine().transport().received().is_empty());
}

#[test]
fn test_disconnected_channel_client_is_skipped() {
    let mut config = GatewayConfig::default();
    config.bridge.deadline_ms = 100;
    let (tx, rx) = mpsc::channel::<ChannelExchange>(1);
    let status = StatusPublisher::from_config(&config.device, Ipv4Addr::LOCALHOST);
    let mut poll_loop = PollLoop::new(engine(SimulatedPeer::new()), &config, status, rx);

    let (_body_tx, body_rx) = mpsc::channel(1);
    let (head_tx, head_rx) = oneshot::channel();
    let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
    let exchange = ChannelExchange::new(
        RequestLine {
            method: "GET".into(),
            path: "/rr_gcode".into(),
            query: Some("gcode=M112".into()),
            client_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            content_length: None,
            request_id: None,
        },
        BodyReader::new(body_rx, Duration::from_millis(1)),
        head_tx,
        chunk_tx,
    );
    tx.try_send(exchange).unwrap();
    drop(head_rx);
    drop(chunk_rx);

    let start = Instant::now();
    poll_loop.run_once();
    poll_loop.run_once();

    assert!(poll_loop.engine().transport().received().is_empty());
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_method_restricted_route() {
    let config = GatewayConfig {
        routes: vec![RouteConfig {
            name: "upload".into(),
            path_prefix: "/rr_".into(),
            method: Some("POST".into()),
            opcode: 1,
        }],
        ..GatewayConfig::default()
    };
    let (mut poll_loop, tx) = poll_loop(text_peer(200, b"ok"), &config);

    let get = MockExchange::get("/rr_upload");
    let get_recorder = get.recorder();
    tx.try_send(get).unwrap();
    poll_loop.run_once();
    assert_eq!(get_recorder.lock().unwrap().head.unwrap().status, 404);

    let post = MockExchange::post("/rr_upload", b"abc".to_vec());
    let post_recorder = post.recorder();
    tx.try_send(post).unwrap();
    poll_loop.run_once();
    assert_eq!(post_recorder.lock().unwrap().head.unwrap().status, 200);
}

#[test]
fn test_config_update_applies_between_passes() {
    let config = GatewayConfig::default();
    let (poll_loop, _tx) = poll_loop(SimulatedPeer::new(), &config);
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let mut poll_loop = poll_loop.with_config_updates(updates_rx);

    let mut updated = config.clone();
    updated.bus.clock_hz = 20_000_000;
    updated.bridge.deadline_ms = 750;
    updated.routes = vec![RouteConfig {
        name: "api".into(),
        path_prefix: "/api/".into(),
        method: None,
        opcode: 0x11,
    }];
    updated.device = DeviceConfig {
        hostname: "bench".into(),
        ..DeviceConfig::default()
    };
    updates_tx.send(config.clone()).unwrap();
    updates_tx.send(updated).unwrap();

    poll_loop.run_once();

    assert_eq!(poll_loop.engine().clock_hz(), 20_000_000);
    assert_eq!(poll_loop.engine().transport().clock_hz(), 20_000_000);
    assert_eq!(poll_loop.bridge().settings().deadline.as_millis(), 750);
    assert!(poll_loop.router().match_request("GET", "/rr_status").is_none());
    let route = poll_loop.router().match_request("GET", "/api/status").unwrap();
    assert_eq!(route.target.opcode, Opcode(0x11));
}

#[test]
fn test_peer_not_ready_skips_exchange() {
    let mut peer = SimulatedPeer::new();
    peer.set_ready(false);
    let (mut poll_loop, _tx) = poll_loop(peer, &GatewayConfig::default());

    let pass = poll_loop.run_once();
    assert_eq!(pass.exchange, Exchange::Skipped);
    assert!(pass.is_idle());
    assert_eq!(poll_loop.engine().transport().exchanges(), 0);
}

#[test]
fn test_run_publishes_status_then_stops() {
    let config = GatewayConfig::default();
    let (poll_loop, _tx) = poll_loop(SimulatedPeer::new(), &config);

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    shutdown.trigger();

    let mut engine = poll_loop.run(rx);
    assert!(engine.outbound_pending());

    engine.do_transaction();
    let frame = &engine.transport().received()[0];
    assert_eq!(
        frame.kind,
        MessageKind::new(PacketClass::Info, Opcode::NETWORK_INFO)
    );
    assert_eq!(frame.payload.len(), STATUS_RECORD_LEN);
}
