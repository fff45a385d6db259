//! Metrics Reporter
//!
//! Generates periodic traffic reports from the relay counters

use super::TrafficStats;
use crate::relay::RelayEngine;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::info;

/// Relay traffic report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficReport {
    pub report_id: String,
    pub generated_at: u64, // Unix timestamp
    pub listen_endpoint: String,
    pub remote_endpoint: String,
    pub active_sessions: usize,
    pub inbound_packets: u64,
    pub inbound_bytes: u64,
    pub outbound_packets: u64,
    pub outbound_bytes: u64,
    pub errors: u64,
}

/// Traffic report generator
pub struct TrafficReporter {
    stats: Arc<TrafficStats>,
    engine: Arc<RelayEngine>,
}

impl TrafficReporter {
    /// Create a new traffic reporter
    pub fn new(stats: Arc<TrafficStats>, engine: Arc<RelayEngine>) -> Self {
        Self { stats, engine }
    }

    /// Generate a report from the current counter values
    pub fn generate_report(&self) -> anyhow::Result<TrafficReport> {
        let report_id = uuid::Uuid::new_v4().to_string();
        let generated_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)?
            .as_secs();

        let active_sessions = self.engine.session_count();
        self.stats.set_active_sessions(active_sessions);
        let snapshot = self.stats.snapshot(active_sessions);

        Ok(TrafficReport {
            report_id,
            generated_at,
            listen_endpoint: self.engine.listen_addr().to_string(),
            remote_endpoint: self.engine.remote_addr().to_string(),
            active_sessions,
            inbound_packets: snapshot.inbound_packets,
            inbound_bytes: snapshot.inbound_bytes,
            outbound_packets: snapshot.outbound_packets,
            outbound_bytes: snapshot.outbound_bytes,
            errors: snapshot.errors,
        })
    }
}

/// Spawn the periodic reporting task. Each tick refreshes the active
/// session gauge and logs a traffic summary.
pub fn spawn_reporter(
    stats: Arc<TrafficStats>,
    engine: Arc<RelayEngine>,
    report_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(report_interval);
        // The first tick completes immediately; skip it so the first
        // report covers a full interval.
        interval.tick().await;

        loop {
            interval.tick().await;

            let active_sessions = engine.session_count();
            stats.set_active_sessions(active_sessions);
            let snapshot = stats.snapshot(active_sessions);

            info!(
                active_sessions = snapshot.active_sessions,
                inbound_packets = snapshot.inbound_packets,
                inbound_bytes = snapshot.inbound_bytes,
                outbound_packets = snapshot.outbound_packets,
                outbound_bytes = snapshot.outbound_bytes,
                errors = snapshot.errors,
                "Traffic report"
            );
        }
    })
}

/// Export a traffic report to JSON format
pub fn export_report_json(report: &TrafficReport) -> anyhow::Result<String> {
    serde_json::to_string_pretty(report)
        .map_err(|e| anyhow::anyhow!("Failed to serialize report to JSON: {}", e))
}
