//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (bus exchanges, bridge requests, peer messages)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_bus_exchanges_total` (counter): exchanges by outcome
//! - `gateway_bus_frames_rejected_total` (counter): over-length inbound frames
//! - `gateway_schedule_rejected_total` (counter): failed schedules by packet class
//! - `gateway_bridge_requests_total` (counter): proxied requests by status
//! - `gateway_bridge_duration_seconds` (histogram): proxied request latency
//! - `gateway_bridge_timeouts_total` (counter): bridge deadlines hit
//! - `gateway_peer_messages_total` (counter): peer-originated messages by opcode
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Skipped exchanges are not counted; the poll loop produces millions

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::bus::frame::{MessageKind, Opcode, PacketClass};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_exchange(outcome: &'static str) {
    if outcome == "skipped" {
        return;
    }
    ::metrics::counter!("gateway_bus_exchanges_total", "outcome" => outcome).increment(1);
}

pub fn record_frame_rejected() {
    ::metrics::counter!("gateway_bus_frames_rejected_total").increment(1);
}

pub fn record_schedule_rejected(kind: MessageKind) {
    let class = match kind.class() {
        Some(PacketClass::Request) => "request",
        Some(PacketClass::Response) => "response",
        Some(PacketClass::Info) => "info",
        None => "unknown",
    };
    ::metrics::counter!("gateway_schedule_rejected_total", "class" => class).increment(1);
}

pub fn record_bridge_request(status: u16, start: Instant) {
    ::metrics::counter!("gateway_bridge_requests_total", "status" => status.to_string())
        .increment(1);
    ::metrics::histogram!("gateway_bridge_duration_seconds")
        .record(start.elapsed().as_secs_f64());
}

pub fn record_bridge_timeout() {
    ::metrics::counter!("gateway_bridge_timeouts_total").increment(1);
}

pub fn record_peer_message(opcode: Opcode) {
    ::metrics::counter!("gateway_peer_messages_total", "opcode" => opcode.to_string())
        .increment(1);
}
