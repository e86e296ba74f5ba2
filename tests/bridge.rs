//! Bridge behaviour against a simulated peer.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use bus_gateway::bus::{
    echo_responder, proxy_reply, Fragment, MessageKind, Opcode, PacketClass, PeerFrame,
    SimulatedPeer, MAX_PAYLOAD,
};
use bus_gateway::gateway::bridge::JSON_ERROR_BODY;
use bus_gateway::gateway::{Bridge, BridgeError, BridgeSettings};
use bus_gateway::routing::ProxyTarget;

mod common;
use common::{engine, proxy_request_kind, replying_peer, text_peer, MockExchange};

fn bridge(deadline_ms: u64) -> Bridge {
    Bridge::new(BridgeSettings {
        deadline: Duration::from_millis(deadline_ms),
        extend_deadline_on_upload: false,
    })
}

fn rr_target() -> ProxyTarget {
    ProxyTarget {
        prefix: "/rr_".into(),
        opcode: Opcode::HTTP_PROXY,
    }
}

#[test]
fn test_hello_world_round_trip() {
    let mut engine = engine(text_peer(200, b"hello world"));
    let mut exchange = MockExchange::get("/rr_status").with_query("type=1");

    let summary = bridge(2000)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap();

    assert_eq!(summary.status, 200);
    assert_eq!(summary.response_fragments, 1);
    assert_eq!(summary.postdata_fragments, 0);
    assert!(summary.elapsed < Duration::from_millis(2000));

    let response = exchange.response();
    let head = response.head.unwrap();
    assert_eq!(head.status, 200);
    assert_eq!(head.content_type, "text/plain");
    assert_eq!(head.content_length, 11);
    assert_eq!(response.body, b"hello world");
    assert!(response.finished);

    let sent = engine.transport().received();
    assert_eq!(sent[0].kind, proxy_request_kind());
    assert_eq!(sent[0].payload, b"status?type=1");
    assert!(sent[0].fragment.is_last());
}

#[test]
fn test_silent_peer_times_out_with_json_error() {
    let mut engine = engine(SimulatedPeer::new());
    let mut exchange = MockExchange::get("/rr_status");

    let start = Instant::now();
    let err = bridge(150)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap_err();

    assert!(matches!(err, BridgeError::Timeout(_)));
    assert!(start.elapsed() >= Duration::from_millis(150));

    let response = exchange.response();
    let head = response.head.unwrap();
    assert_eq!(head.status, 200);
    assert_eq!(head.content_type, "application/json");
    assert_eq!(response.body, JSON_ERROR_BODY);
    assert_eq!(response.body, b"{\"err\":1}");
    assert!(response.finished);
}

#[test]
fn test_large_post_is_fragmented() {
    let body: Vec<u8> = (0..5000).map(|i| (i % 200) as u8).collect();
    let mut engine = engine(SimulatedPeer::with_responder(echo_responder()));
    let mut exchange = MockExchange::post("/rr_upload", body.clone()).with_query("name=0:/gcodes/a.g");

    let summary = bridge(2000)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap();
    assert_eq!(summary.postdata_fragments, 3);

    let sent = engine.transport().received();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[0].payload, b"upload?name=0:/gcodes/a.g&length=5000");
    assert!(!sent[0].fragment.is_last());

    let postdata: Vec<_> = sent[1..]
        .iter()
        .map(|f| (f.fragment.index(), f.fragment.is_last(), f.payload.len()))
        .collect();
    assert_eq!(
        postdata,
        vec![(1, false, 2048), (2, false, 2048), (3, true, 904)]
    );
    let uploaded: Vec<u8> = sent[1..].iter().flat_map(|f| f.payload.clone()).collect();
    assert_eq!(uploaded, body);

    let response = exchange.response();
    assert_eq!(response.head.unwrap().content_type, "application/json");
    let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(json["postBytes"], 5000);
    assert_eq!(json["request"], "upload?name=0:/gcodes/a.g&length=5000");
}

#[test]
fn test_json_flag_selects_content_type() {
    let mut engine = engine(replying_peer(proxy_reply(404, true, b"{\"err\":2}")));
    let mut exchange = MockExchange::get("/rr_missing");

    let summary = bridge(2000)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap();
    assert_eq!(summary.status, 404);

    let head = exchange.response().head.unwrap();
    assert_eq!(head.status, 404);
    assert_eq!(head.content_type, "application/json");
}

#[test]
fn test_multi_fragment_response_is_reassembled() {
    let body: Vec<u8> = (0..6000).map(|i| b'a' + (i % 26) as u8).collect();
    let mut engine = engine(text_peer(200, &body));
    let mut exchange = MockExchange::get("/rr_download");

    let summary = bridge(2000)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap();
    assert_eq!(summary.response_fragments, 3);

    let response = exchange.response();
    assert_eq!(response.head.unwrap().content_length, 6000);
    assert_eq!(response.body, body);
    assert_eq!(response.chunks, 3);
    assert!(response.finished);
}

#[test]
fn test_unrelated_frames_are_discarded() {
    let mut peer = text_peer(200, b"ok");
    peer.queue(PeerFrame::new(
        MessageKind::new(PacketClass::Info, Opcode(0x42)),
        Fragment::new(0, true),
        b"noise".to_vec(),
    ));
    peer.queue(PeerFrame::response(
        Opcode(0x05),
        Fragment::new(0, true),
        proxy_reply(500, false, b"wrong opcode")[0].payload.clone(),
    ));
    let mut engine = engine(peer);
    let mut exchange = MockExchange::get("/rr_status");

    bridge(2000)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap();

    let response = exchange.response();
    assert_eq!(response.head.unwrap().status, 200);
    assert_eq!(response.body, b"ok");
    assert!(!engine.data_ready());
}

#[test]
fn test_short_header_fragment_yields_json_error() {
    let mut engine = engine(replying_peer(vec![PeerFrame::response(
        Opcode::HTTP_PROXY,
        Fragment::new(0, true),
        vec![200, 0, 0],
    )]));
    let mut exchange = MockExchange::get("/rr_status");

    let err = bridge(2000)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap_err();
    assert!(matches!(err, BridgeError::MalformedResponse));

    let response = exchange.response();
    assert_eq!(response.head.unwrap().content_type, "application/json");
    assert_eq!(response.body, JSON_ERROR_BODY);
}

#[test]
fn test_body_fragment_before_header_is_dropped() {
    let mut reply = proxy_reply(200, false, b"late header");
    reply.insert(
        0,
        PeerFrame::response(Opcode::HTTP_PROXY, Fragment::new(1, false), b"orphan".to_vec()),
    );
    let mut engine = engine(replying_peer(reply));
    let mut exchange = MockExchange::get("/rr_status");

    bridge(2000)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap();
    assert_eq!(exchange.response().body, b"late header");
}

#[test]
fn test_timeout_after_header_truncates_stream() {
    let body = vec![b'z'; 3000];
    let first = proxy_reply(200, false, &body).remove(0);
    let mut engine = engine(replying_peer(vec![first]));
    let mut exchange = MockExchange::get("/rr_download");

    let err = bridge(150)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap_err();
    assert!(matches!(err, BridgeError::Timeout(_)));

    let response = exchange.response();
    let head = response.head.unwrap();
    assert_eq!(head.status, 200);
    assert_eq!(head.content_type, "text/plain");
    assert_eq!(head.content_length, 3000);
    assert_eq!(response.body.len(), MAX_PAYLOAD - 8);
    assert!(response.finished);
}

#[test]
fn test_request_waits_for_occupied_slot() {
    let mut engine = engine(text_peer(200, b"queued"));
    engine.schedule_info(Opcode::NETWORK_INFO, b"record").unwrap();
    let mut exchange = MockExchange::get("/rr_status");

    bridge(2000)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap();

    let sent = engine.transport().received();
    assert_eq!(sent[0].kind, MessageKind::new(PacketClass::Info, Opcode::NETWORK_INFO));
    assert_eq!(sent[0].payload, b"record");
    assert_eq!(sent[1].kind, proxy_request_kind());
    assert_eq!(sent[1].payload, b"status");
    assert_eq!(exchange.response().body, b"queued");
}

#[test]
fn test_oversized_request_never_touches_bus() {
    let mut engine = engine(text_peer(200, b"unused"));
    let query = "x".repeat(MAX_PAYLOAD);
    let mut exchange = MockExchange::get("/rr_status").with_query(&query);

    let err = bridge(2000)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap_err();
    assert!(matches!(err, BridgeError::RequestTooLarge { .. }));
    assert_eq!(engine.transport().exchanges(), 0);
    assert_eq!(exchange.response().body, JSON_ERROR_BODY);
}

#[test]
fn test_client_address_goes_in_request_frame() {
    let mut engine = engine(text_peer(200, b"ok"));
    let mut exchange = MockExchange::get("/rr_status")
        .with_client(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));

    bridge(2000)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap();

    let address = engine.transport().received()[0].address;
    assert_eq!(address.to_le_bytes(), [192, 168, 1, 20]);
}

fn slow_upload_bridge(extend: bool) -> Bridge {
    Bridge::new(BridgeSettings {
        deadline: Duration::from_millis(100),
        extend_deadline_on_upload: extend,
    })
}

fn slow_upload() -> MockExchange {
    MockExchange::post("/rr_upload", vec![7u8; 10_000]).with_read_delay(Duration::from_millis(40))
}

#[test]
fn test_slow_upload_outlasts_fixed_deadline() {
    let mut engine = engine(SimulatedPeer::with_responder(echo_responder()));
    let mut exchange = slow_upload();

    let err = slow_upload_bridge(false)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap_err();
    assert!(matches!(err, BridgeError::Timeout(_)));
    assert_eq!(exchange.response().body, JSON_ERROR_BODY);
}

#[test]
fn test_slow_upload_completes_with_extended_deadline() {
    let mut engine = engine(SimulatedPeer::with_responder(echo_responder()));
    let mut exchange = slow_upload();

    let summary = slow_upload_bridge(true)
        .proxy(&mut engine, &mut exchange, &rr_target())
        .unwrap();
    assert_eq!(summary.postdata_fragments, 5);
    assert!(summary.elapsed > Duration::from_millis(100));

    let json: serde_json::Value = serde_json::from_slice(&exchange.response().body).unwrap();
    assert_eq!(json["postBytes"], 10_000);
}
