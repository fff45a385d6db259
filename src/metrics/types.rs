//! Metrics Types

use serde::{Deserialize, Serialize};

/// Point-in-time view of relay traffic counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub active_sessions: usize,
    pub inbound_packets: u64,
    pub inbound_bytes: u64,
    pub outbound_packets: u64,
    pub outbound_bytes: u64,
    pub errors: u64,
}

impl TrafficSnapshot {
    /// Total bytes moved in both directions.
    pub fn total_bytes(&self) -> u64 {
        self.inbound_bytes + self.outbound_bytes
    }

    /// Total packets moved in both directions.
    pub fn total_packets(&self) -> u64 {
        self.inbound_packets + self.outbound_packets
    }
}
