//! UDPPipe - UDP Relay
//!
//! Forwards UDP datagrams between many clients and a single remote
//! endpoint, tracking a session per client address with idle eviction
//! and traffic accounting.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::lookup_host;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use udppipe::{
    config::{Config, ConfigManager},
    metrics::{spawn_reporter, MetricsServer, TrafficStats},
    relay::RelayEngine,
    RelayListener, ShutdownCoordinator,
};

/// CLI arguments for UDPPipe
#[derive(Parser, Debug)]
#[command(name = "udppipe")]
#[command(about = "UDPPipe - UDP relay with per-client session tracking")]
#[command(version)]
#[command(long_about = "
UDPPipe - UDP Relay

Forwards UDP datagrams between many clients and a single remote endpoint.
Each client address gets its own session with a dedicated outbound socket,
refreshed on activity and evicted after an idle TTL.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  UDPPIPE_LISTEN_ADDR    - Listen address (e.g., 127.0.0.1:5300)
  UDPPIPE_REMOTE_HOST    - Remote host to forward to
  UDPPIPE_REMOTE_PORT    - Remote port to forward to
  UDPPIPE_SESSION_TTL    - Idle session lifetime (e.g., 30s, 2m)
  UDPPIPE_SWEEP_INTERVAL - Eviction sweep interval (e.g., 10s)
  UDPPIPE_BUFFER_SIZE    - Per-session receive buffer size in bytes
  UDPPIPE_LOG_LEVEL      - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Listen address (overrides config file)
    #[arg(short, long, help = "Listen address (e.g., 127.0.0.1:5300)")]
    pub listen: Option<String>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, help = "Port to listen on")]
    pub port: Option<u16>,

    /// Remote endpoint to forward to (overrides config file)
    #[arg(short, long, help = "Remote endpoint (e.g., 10.0.0.1:53)")]
    pub remote: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Idle session lifetime in seconds
    #[arg(long, help = "Idle session lifetime in seconds")]
    pub session_ttl: Option<u64>,

    /// Buffer size in bytes
    #[arg(long, help = "Per-session receive buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    init_tracing(&args)?;

    info!(
        "Starting UDPPipe v{} - UDP relay",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(
        args.listen.as_deref(),
        args.port,
        args.remote.as_deref(),
        args.session_ttl,
        args.buffer_size,
    );

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    // If validate-config flag is set, just validate and exit
    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Listen address: {}", config.server.listen_addr);
        info!("  Remote endpoint: {}", config.remote_endpoint());
        info!("  Session TTL: {:?}", config.relay.session_ttl);
        info!("  Sweep interval: {:?}", config.relay.sweep_interval);
        info!("  Buffer size: {} bytes", config.relay.buffer_size);
        info!(
            "  Monitoring: {}",
            if config.monitoring.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        return Ok(());
    }

    info!("Configuration loaded successfully");
    info!("Listen address: {}", config.server.listen_addr);
    info!("Remote endpoint: {}", config.remote_endpoint());

    // Resolve the remote endpoint once at startup
    let remote_addr = resolve_remote(&config).await?;

    // Create shutdown coordinator
    let shutdown_timeout = config.server.shutdown_timeout;
    let shutdown_coordinator = ShutdownCoordinator::new(shutdown_timeout);

    // Create traffic accounting and the relay engine
    let stats = Arc::new(TrafficStats::new());
    let engine = Arc::new(RelayEngine::from_config(&config, remote_addr, stats.clone()));

    // Bind the listener up front so startup fails fast on a bad address
    let mut listener = RelayListener::new(engine.clone(), config.server.listen_addr);
    listener
        .bind()
        .await
        .context("Failed to bind relay listener")?;

    // Start metrics server if enabled
    let metrics_handle = match (config.monitoring.enabled, config.monitoring.metrics_addr) {
        (true, Some(metrics_addr)) => {
            info!("Starting metrics server on {}", metrics_addr);

            let metrics_server =
                MetricsServer::new(stats.clone(), engine.clone(), metrics_addr.to_string());

            Some(tokio::spawn(async move {
                if let Err(e) = metrics_server.start().await {
                    error!("Metrics server error: {}", e);
                }
            }))
        }
        _ => {
            info!("Metrics server disabled");
            None
        }
    };

    // Start periodic traffic reporting if enabled
    let reporter_handle = if config.monitoring.enabled {
        Some(spawn_reporter(
            stats.clone(),
            engine.clone(),
            config.monitoring.report_interval,
        ))
    } else {
        None
    };

    // Start the listener in a separate task
    let listener_shutdown = shutdown_coordinator.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = listener.start(listener_shutdown).await {
            error!("Relay listener error: {}", e);
        }
    });

    info!("UDPPipe started successfully");
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    // Start listening for shutdown signals
    let signal_result = shutdown_coordinator.listen_for_signals().await;
    if let Err(e) = signal_result {
        error!("Error setting up signal handlers: {}", e);
    }

    // Initiate graceful shutdown
    info!("Initiating graceful shutdown...");

    // Wait for the listener task to stop accepting datagrams
    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Listener task failed: {}", e);
        }
    }

    // Close every relay session
    if let Err(e) = shutdown_coordinator.shutdown_relay(&engine).await {
        warn!("Error during relay shutdown: {}", e);
    }

    // Stop auxiliary tasks
    if let Some(handle) = reporter_handle {
        handle.abort();
    }
    if let Some(handle) = metrics_handle {
        handle.abort();
        info!("Metrics server shutdown");
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Resolve the configured remote endpoint to a socket address
async fn resolve_remote(config: &Config) -> Result<SocketAddr> {
    let endpoint = config.remote_endpoint();
    let mut addrs = lookup_host(&endpoint)
        .await
        .with_context(|| format!("Failed to resolve remote endpoint {}", endpoint))?;

    let addr = addrs
        .next()
        .ok_or_else(|| anyhow!("Remote endpoint {} resolved to no addresses", endpoint))?;

    info!("Remote endpoint {} resolved to {}", endpoint, addr);
    Ok(addr)
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
