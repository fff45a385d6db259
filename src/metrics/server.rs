//! Metrics HTTP Server
//!
//! Provides HTTP endpoints for Prometheus scraping and JSON statistics

use crate::metrics::{TrafficReporter, TrafficStats, reporter::export_report_json};
use crate::relay::RelayEngine;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, error, debug};

/// HTTP server for serving relay metrics
pub struct MetricsServer {
    stats: Arc<TrafficStats>,
    engine: Arc<RelayEngine>,
    bind_addr: String,
}

impl MetricsServer {
    /// Create a new metrics server
    pub fn new(stats: Arc<TrafficStats>, engine: Arc<RelayEngine>, bind_addr: String) -> Self {
        Self {
            stats,
            engine,
            bind_addr,
        }
    }

    /// Start the metrics server
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        info!(bind_addr = %self.bind_addr, "Metrics server started");
        self.accept_loop(listener).await
    }

    async fn accept_loop(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            match listener.accept().await {
                Ok((mut stream, addr)) => {
                    debug!(client_addr = %addr, "Metrics request received");

                    let stats = self.stats.clone();
                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_request(&mut stream, stats, engine).await {
                            error!(error = %e, client_addr = %addr, "Failed to handle metrics request");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept metrics connection");
                }
            }
        }
    }
}

/// Handle a single HTTP request
async fn handle_request(
    stream: &mut tokio::net::TcpStream,
    stats: Arc<TrafficStats>,
    engine: Arc<RelayEngine>,
) -> anyhow::Result<()> {
    // Read the HTTP request (simplified - just read some bytes)
    let mut buffer = [0; 1024];
    let bytes_read = stream.read(&mut buffer).await?;

    if bytes_read == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);

    if request.starts_with("GET /metrics") {
        stats.set_active_sessions(engine.session_count());
        let metrics_data = stats.export_prometheus();

        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}",
            metrics_data.len(),
            metrics_data
        );

        stream.write_all(response.as_bytes()).await?;
        debug!("Sent Prometheus metrics response");
    } else if request.starts_with("GET /stats") {
        let reporter = TrafficReporter::new(stats, engine);
        let report = reporter.generate_report()?;
        let body = export_report_json(&report)?;

        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}",
            body.len(),
            body
        );

        stream.write_all(response.as_bytes()).await?;
        debug!("Sent JSON statistics response");
    } else if request.starts_with("GET /health") {
        // Health check endpoint
        let response = "HTTP/1.1 200 OK\r\n\
                       Content-Type: text/plain\r\n\
                       Content-Length: 2\r\n\
                       \r\n\
                       OK";

        stream.write_all(response.as_bytes()).await?;
        debug!("Sent health check response");
    } else {
        // 404 for other paths
        let response = "HTTP/1.1 404 Not Found\r\n\
                       Content-Type: text/plain\r\n\
                       Content-Length: 9\r\n\
                       \r\n\
                       Not Found";

        stream.write_all(response.as_bytes()).await?;
        debug!("Sent 404 response");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{NullSink, PacketSink};
    use tokio::net::TcpStream;

    async fn spawn_test_server() -> std::net::SocketAddr {
        let stats = Arc::new(TrafficStats::new());
        stats.on_inbound(b"some inbound traffic");
        let engine = Arc::new(RelayEngine::new(
            "127.0.0.1:5300".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
            Arc::new(NullSink),
        ));
        let server = MetricsServer::new(stats, engine, "127.0.0.1:0".to_string());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.accept_loop(listener).await;
        });
        addr
    }

    async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    response.extend_from_slice(&buf[..n]);
                    if n < buf.len() {
                        break;
                    }
                }
            }
        }
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let addr = spawn_test_server().await;
        let response = http_get(addr, "/metrics").await;

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("udppipe_inbound_bytes_total"));
    }

    #[tokio::test]
    async fn stats_endpoint_serves_json() {
        let addr = spawn_test_server().await;
        let response = http_get(addr, "/stats").await;

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("\"inbound_bytes\": 20"));
    }

    #[tokio::test]
    async fn health_endpoint_responds_ok() {
        let addr = spawn_test_server().await;
        let response = http_get(addr, "/health").await;

        assert!(response.starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn unknown_path_returns_not_found() {
        let addr = spawn_test_server().await;
        let response = http_get(addr, "/nope").await;

        assert!(response.starts_with("HTTP/1.1 404 Not Found"));
    }
}
