pub mod server;

use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    // Peers
    peers_connected: IntGauge,
    peers_established: IntGauge,
    peer_connection_events: IntCounterVec,
    peer_disconnection_events: IntCounterVec,
    // Sync
    local_height: IntGauge,
    header_height: IntGauge,
    best_peer_height: IntGauge,
    header_first_mode: IntGauge,
    sync_starts: IntCounterVec,
    inflight_requests: IntGaugeVec,
    stalled_requests: IntCounter,
    block_response_time: HistogramVec,
    // Relay
    relayed_messages: IntCounterVec,
    rejected_messages: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let peers_connected = IntGauge::with_opts(Opts::new("network_peers_connected", "Number of connected peers")).unwrap();
        registry.register(Box::new(peers_connected.clone())).unwrap();

        let peers_established = IntGauge::with_opts(Opts::new("network_peers_established", "Number of peers that completed the handshake")).unwrap();
        registry.register(Box::new(peers_established.clone())).unwrap();

        let peer_connection_events = IntCounterVec::new(
            Opts::new("auxpow_peer_connection_events_total", "Total number of peer connection events"),
            &["direction", "result"],
        ).unwrap();
        registry.register(Box::new(peer_connection_events.clone())).unwrap();

        let peer_disconnection_events = IntCounterVec::new(
            Opts::new("auxpow_peer_disconnection_events_total", "Total number of peer disconnection events"),
            &["direction", "reason"],
        ).unwrap();
        registry.register(Box::new(peer_disconnection_events.clone())).unwrap();

        // Sync
        let local_height = IntGauge::with_opts(Opts::new("auxpow_local_height", "Height of the local best block")).unwrap();
        registry.register(Box::new(local_height.clone())).unwrap();

        let header_height = IntGauge::with_opts(Opts::new("auxpow_header_height", "Height of the local header tip")).unwrap();
        registry.register(Box::new(header_height.clone())).unwrap();

        let best_peer_height = IntGauge::with_opts(Opts::new("auxpow_best_peer_height", "Highest height reported by an established peer")).unwrap();
        registry.register(Box::new(best_peer_height.clone())).unwrap();

        let header_first_mode = IntGauge::with_opts(Opts::new("auxpow_header_first_mode", "1 while headers-first sync is active")).unwrap();
        registry.register(Box::new(header_first_mode.clone())).unwrap();

        let sync_starts = IntCounterVec::new(
            Opts::new("auxpow_sync_starts_total", "Total number of sync attempts started"),
            &["mode"],
        ).unwrap();
        registry.register(Box::new(sync_starts.clone())).unwrap();

        let inflight_requests = IntGaugeVec::new(
            Opts::new("auxpow_inflight_requests", "Requests holding a flight-window slot"),
            &["kind"],
        ).unwrap();
        registry.register(Box::new(inflight_requests.clone())).unwrap();

        let stalled_requests = IntCounter::with_opts(Opts::new("auxpow_stalled_requests_total", "Block requests that timed out and were re-issued")).unwrap();
        registry.register(Box::new(stalled_requests.clone())).unwrap();

        let block_response_time = HistogramVec::new(
            HistogramOpts::new("auxpow_block_response_time_seconds", "Time between a block request and its response")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &[],
        ).unwrap();
        registry.register(Box::new(block_response_time.clone())).unwrap();

        // Relay
        let relayed_messages = IntCounterVec::new(
            Opts::new("auxpow_relayed_messages_total", "Messages forwarded to peers"),
            &["kind"],
        ).unwrap();
        registry.register(Box::new(relayed_messages.clone())).unwrap();

        let rejected_messages = IntCounterVec::new(
            Opts::new("auxpow_rejected_messages_total", "Inbound messages dropped as malformed"),
            &["command"],
        ).unwrap();
        registry.register(Box::new(rejected_messages.clone())).unwrap();

        Self {
            registry,
            peers_connected,
            peers_established,
            peer_connection_events,
            peer_disconnection_events,
            local_height,
            header_height,
            best_peer_height,
            header_first_mode,
            sync_starts,
            inflight_requests,
            stalled_requests,
            block_response_time,
            relayed_messages,
            rejected_messages,
        }
    }

    pub fn gather(&self) -> Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::<u8>::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    // Peers
    pub fn set_peers_connected(&self, v: i64) {
        self.peers_connected.set(v);
    }

    pub fn set_peers_established(&self, v: i64) {
        self.peers_established.set(v);
    }

    pub fn inc_peer_connection(&self, direction: &str, result: &str) {
        self.peer_connection_events.with_label_values(&[direction, result]).inc();
    }

    pub fn inc_peer_disconnection(&self, direction: &str, reason: &str) {
        self.peer_disconnection_events.with_label_values(&[direction, reason]).inc();
    }

    // Sync
    pub fn set_local_height(&self, v: i64) {
        self.local_height.set(v);
    }

    pub fn set_header_height(&self, v: i64) {
        self.header_height.set(v);
    }

    pub fn set_best_peer_height(&self, v: i64) {
        self.best_peer_height.set(v);
    }

    pub fn set_header_first_mode(&self, active: bool) {
        self.header_first_mode.set(active as i64);
    }

    pub fn inc_sync_start(&self, mode: &str) {
        self.sync_starts.with_label_values(&[mode]).inc();
    }

    pub fn set_inflight(&self, kind: &str, v: i64) {
        self.inflight_requests.with_label_values(&[kind]).set(v);
    }

    pub fn inc_stalled_requests(&self) {
        self.stalled_requests.inc();
    }

    pub fn observe_block_response_time(&self, seconds: f64) {
        self.block_response_time.with_label_values::<&str>(&[]).observe(seconds);
    }

    // Relay
    pub fn inc_relayed(&self, kind: &str) {
        self.relayed_messages.with_label_values(&[kind]).inc();
    }

    pub fn inc_rejected(&self, command: &str) {
        self.rejected_messages.with_label_values(&[command]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedMetrics = Arc<Metrics>;
