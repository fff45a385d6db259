//! Metrics Module
//!
//! Handles traffic accounting and export.

pub mod collector;
pub mod types;
pub mod server;
pub mod reporter;

pub use collector::TrafficStats;
pub use server::MetricsServer;
pub use reporter::{TrafficReport, TrafficReporter, export_report_json, spawn_reporter};
pub use types::TrafficSnapshot;
