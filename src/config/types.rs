//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub monitoring: MonitoringConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub remote_host: String,
    pub remote_port: u16,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Relay session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    pub buffer_size: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub metrics_addr: Option<SocketAddr>,
    pub log_level: String,
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,
}

impl Config {
    /// Remote endpoint as a resolvable `host:port` string.
    pub fn remote_endpoint(&self) -> String {
        format!("{}:{}", self.server.remote_host, self.server.remote_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "127.0.0.1:5300".parse().unwrap(),
                remote_host: "127.0.0.1".to_string(),
                remote_port: 53,
                shutdown_timeout: Duration::from_secs(30),
            },
            relay: RelayConfig {
                session_ttl: Duration::from_secs(30),
                sweep_interval: Duration::from_secs(10),
                buffer_size: 16384,
            },
            monitoring: MonitoringConfig {
                enabled: true,
                metrics_addr: Some("127.0.0.1:9090".parse().unwrap()),
                log_level: "info".to_string(),
                report_interval: Duration::from_secs(60),
            },
        }
    }
}
