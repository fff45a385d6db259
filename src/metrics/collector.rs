//! Metrics Collector

use super::TrafficSnapshot;
use crate::relay::PacketSink;
use std::sync::atomic::{AtomicU64, Ordering};
use prometheus::{Counter, Gauge, Registry, TextEncoder};
use tracing::error;

/// Collects and exports relay traffic metrics.
///
/// Installed as the engine's packet sink: inbound and outbound reports
/// feed the byte and packet counters, error reports feed the error
/// counter. The active session gauge is pushed in from outside since the
/// sink callbacks carry no session lifecycle information.
pub struct TrafficStats {
    prometheus_registry: Registry,

    // Prometheus metrics
    inbound_packets_total: Counter,
    inbound_bytes_total: Counter,
    outbound_packets_total: Counter,
    outbound_bytes_total: Counter,
    errors_total: Counter,
    active_sessions: Gauge,

    // Internal counters
    inbound_packets: AtomicU64,
    inbound_bytes: AtomicU64,
    outbound_packets: AtomicU64,
    outbound_bytes: AtomicU64,
    errors: AtomicU64,
}

impl TrafficStats {
    /// Create a new traffic metrics collector
    pub fn new() -> Self {
        let prometheus_registry = Registry::new();

        // Create Prometheus metrics
        let inbound_packets_total = Counter::new(
            "udppipe_inbound_packets_total",
            "Total datagrams forwarded from clients to the remote endpoint"
        ).expect("Failed to create inbound_packets_total counter");

        let inbound_bytes_total = Counter::new(
            "udppipe_inbound_bytes_total",
            "Total bytes forwarded from clients to the remote endpoint"
        ).expect("Failed to create inbound_bytes_total counter");

        let outbound_packets_total = Counter::new(
            "udppipe_outbound_packets_total",
            "Total datagrams forwarded from the remote endpoint to clients"
        ).expect("Failed to create outbound_packets_total counter");

        let outbound_bytes_total = Counter::new(
            "udppipe_outbound_bytes_total",
            "Total bytes forwarded from the remote endpoint to clients"
        ).expect("Failed to create outbound_bytes_total counter");

        let errors_total = Counter::new(
            "udppipe_session_errors_total",
            "Total per-session relay failures"
        ).expect("Failed to create errors_total counter");

        let active_sessions = Gauge::new(
            "udppipe_active_sessions",
            "Number of currently active relay sessions"
        ).expect("Failed to create active_sessions gauge");

        // Register metrics
        prometheus_registry.register(Box::new(inbound_packets_total.clone()))
            .expect("Failed to register inbound_packets_total");
        prometheus_registry.register(Box::new(inbound_bytes_total.clone()))
            .expect("Failed to register inbound_bytes_total");
        prometheus_registry.register(Box::new(outbound_packets_total.clone()))
            .expect("Failed to register outbound_packets_total");
        prometheus_registry.register(Box::new(outbound_bytes_total.clone()))
            .expect("Failed to register outbound_bytes_total");
        prometheus_registry.register(Box::new(errors_total.clone()))
            .expect("Failed to register errors_total");
        prometheus_registry.register(Box::new(active_sessions.clone()))
            .expect("Failed to register active_sessions");

        Self {
            prometheus_registry,
            inbound_packets_total,
            inbound_bytes_total,
            outbound_packets_total,
            outbound_bytes_total,
            errors_total,
            active_sessions,
            inbound_packets: AtomicU64::new(0),
            inbound_bytes: AtomicU64::new(0),
            outbound_packets: AtomicU64::new(0),
            outbound_bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Update the active session gauge
    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.set(count as f64);
    }

    /// Get total datagrams forwarded toward the remote endpoint
    pub fn get_inbound_packets(&self) -> u64 {
        self.inbound_packets.load(Ordering::Relaxed)
    }

    /// Get total bytes forwarded toward the remote endpoint
    pub fn get_inbound_bytes(&self) -> u64 {
        self.inbound_bytes.load(Ordering::Relaxed)
    }

    /// Get total datagrams forwarded back to clients
    pub fn get_outbound_packets(&self) -> u64 {
        self.outbound_packets.load(Ordering::Relaxed)
    }

    /// Get total bytes forwarded back to clients
    pub fn get_outbound_bytes(&self) -> u64 {
        self.outbound_bytes.load(Ordering::Relaxed)
    }

    /// Get total per-session failures
    pub fn get_errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self, active_sessions: usize) -> TrafficSnapshot {
        TrafficSnapshot {
            active_sessions,
            inbound_packets: self.get_inbound_packets(),
            inbound_bytes: self.get_inbound_bytes(),
            outbound_packets: self.get_outbound_packets(),
            outbound_bytes: self.get_outbound_bytes(),
            errors: self.get_errors(),
        }
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}

impl Default for TrafficStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketSink for TrafficStats {
    fn on_inbound(&self, payload: &[u8]) {
        self.inbound_packets_total.inc();
        self.inbound_bytes_total.inc_by(payload.len() as f64);
        self.inbound_packets.fetch_add(1, Ordering::Relaxed);
        self.inbound_bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);
    }

    fn on_outbound(&self, payload: &[u8]) {
        self.outbound_packets_total.inc();
        self.outbound_bytes_total.inc_by(payload.len() as f64);
        self.outbound_packets.fetch_add(1, Ordering::Relaxed);
        self.outbound_bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);
    }

    fn on_error(&self, _error: &anyhow::Error) {
        self.errors_total.inc();
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_reports_feed_counters() {
        let stats = TrafficStats::new();

        stats.on_inbound(b"hello");
        stats.on_inbound(b"world!!");
        stats.on_outbound(b"pong");
        stats.on_error(&anyhow::anyhow!("boom"));

        assert_eq!(stats.get_inbound_packets(), 2);
        assert_eq!(stats.get_inbound_bytes(), 12);
        assert_eq!(stats.get_outbound_packets(), 1);
        assert_eq!(stats.get_outbound_bytes(), 4);
        assert_eq!(stats.get_errors(), 1);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let stats = TrafficStats::new();
        stats.on_inbound(b"abc");
        stats.on_outbound(b"defgh");

        let snapshot = stats.snapshot(3);
        assert_eq!(snapshot.active_sessions, 3);
        assert_eq!(snapshot.total_packets(), 2);
        assert_eq!(snapshot.total_bytes(), 8);
        assert_eq!(snapshot.errors, 0);
    }

    #[test]
    fn prometheus_export_contains_counters() {
        let stats = TrafficStats::new();
        stats.on_inbound(b"0123456789");
        stats.set_active_sessions(2);

        let exported = stats.export_prometheus();
        assert!(exported.contains("udppipe_inbound_bytes_total 10"));
        assert!(exported.contains("udppipe_active_sessions 2"));
    }
}
