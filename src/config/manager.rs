//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{Context, bail};
use std::path::Path;
use std::net::SocketAddr;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config.validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        // Override with environment variables if present
        if let Ok(listen_addr) = std::env::var("UDPPIPE_LISTEN_ADDR") {
            config.server.listen_addr = listen_addr.parse::<SocketAddr>()
                .with_context(|| format!("Invalid UDPPIPE_LISTEN_ADDR: {}", listen_addr))?;
        }

        if let Ok(remote_host) = std::env::var("UDPPIPE_REMOTE_HOST") {
            config.server.remote_host = remote_host;
        }

        if let Ok(remote_port) = std::env::var("UDPPIPE_REMOTE_PORT") {
            config.server.remote_port = remote_port.parse::<u16>()
                .with_context(|| format!("Invalid UDPPIPE_REMOTE_PORT: {}", remote_port))?;
        }

        if let Ok(ttl) = std::env::var("UDPPIPE_SESSION_TTL") {
            config.relay.session_ttl = humantime::parse_duration(&ttl)
                .with_context(|| format!("Invalid UDPPIPE_SESSION_TTL: {}", ttl))?;
        }

        if let Ok(interval) = std::env::var("UDPPIPE_SWEEP_INTERVAL") {
            config.relay.sweep_interval = humantime::parse_duration(&interval)
                .with_context(|| format!("Invalid UDPPIPE_SWEEP_INTERVAL: {}", interval))?;
        }

        if let Ok(buffer_size) = std::env::var("UDPPIPE_BUFFER_SIZE") {
            config.relay.buffer_size = buffer_size.parse::<usize>()
                .with_context(|| format!("Invalid UDPPIPE_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(log_level) = std::env::var("UDPPIPE_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Validate server configuration
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        // Validate relay configuration
        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        // Validate monitoring configuration
        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    /// Validate server configuration
    fn validate_server_config(&self) -> Result<()> {
        if self.server.remote_host.is_empty() {
            bail!("remote_host must not be empty");
        }

        if self.server.remote_port == 0 {
            bail!("remote_port must be greater than 0");
        }

        if self.server.shutdown_timeout.as_secs() == 0 {
            bail!("shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    /// Validate relay configuration
    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.session_ttl.as_secs() == 0 {
            bail!("session_ttl must be at least 1 second");
        }

        if self.relay.session_ttl.as_secs() > 3600 {
            bail!("session_ttl cannot exceed 1 hour");
        }

        if self.relay.sweep_interval.as_millis() == 0 {
            bail!("sweep_interval must be greater than 0");
        }

        if self.relay.sweep_interval > self.relay.session_ttl {
            bail!("sweep_interval cannot exceed session_ttl");
        }

        if self.relay.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.relay.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    /// Validate monitoring configuration
    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!("monitoring.log_level must be one of: {}", valid_log_levels.join(", "));
        }

        if self.monitoring.report_interval.as_secs() == 0 {
            bail!("monitoring.report_interval must be at least 1 second");
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        listen: Option<&str>,
        port: Option<u16>,
        remote: Option<&str>,
        session_ttl: Option<u64>,
        buffer_size: Option<usize>,
    ) {
        // Override listen address if provided
        if let Some(listen_str) = listen {
            if let Ok(addr) = listen_str.parse::<SocketAddr>() {
                self.server.listen_addr = addr;
                tracing::info!("CLI override: listen address set to {}", addr);
            } else {
                tracing::warn!("Invalid listen address provided: {}", listen_str);
            }
        }

        // Override listen port if provided
        if let Some(port) = port {
            self.server.listen_addr.set_port(port);
            tracing::info!("CLI override: listen port set to {}", port);
        }

        // Override remote endpoint if provided
        if let Some(remote_str) = remote {
            match remote_str.rsplit_once(':') {
                Some((host, port_str)) if !host.is_empty() => match port_str.parse::<u16>() {
                    Ok(remote_port) if remote_port > 0 => {
                        self.server.remote_host = host.to_string();
                        self.server.remote_port = remote_port;
                        tracing::info!("CLI override: remote endpoint set to {}:{}", host, remote_port);
                    }
                    _ => tracing::warn!("Invalid remote port provided: {}", remote_str),
                },
                _ => tracing::warn!("Invalid remote endpoint provided: {}", remote_str),
            }
        }

        // Override session TTL if provided
        if let Some(ttl_secs) = session_ttl {
            self.relay.session_ttl = std::time::Duration::from_secs(ttl_secs);
            tracing::info!("CLI override: session TTL set to {}s", ttl_secs);
        }

        // Override buffer size if provided
        if let Some(buffer_size) = buffer_size {
            self.relay.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }
    }
}
