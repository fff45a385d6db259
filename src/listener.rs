//! Relay Listener
//!
//! Owns the shared listening socket: receives client datagrams and hands
//! them to the relay engine, which also sends every remote reply back to
//! clients through this same socket.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use anyhow::anyhow;

use crate::relay::RelayEngine;
use crate::Result;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Accepts client datagrams and dispatches them to the relay engine
pub struct RelayListener {
    engine: Arc<RelayEngine>,
    listen_addr: SocketAddr,
    socket: Option<Arc<UdpSocket>>,
}

impl RelayListener {
    /// Create a new relay listener
    pub fn new(engine: Arc<RelayEngine>, listen_addr: SocketAddr) -> Self {
        Self {
            engine,
            listen_addr,
            socket: None,
        }
    }

    /// Bind the listening socket and return the bound address
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        info!("Binding UDP listener to {}", self.listen_addr);
        let socket = UdpSocket::bind(self.listen_addr).await?;
        let local_addr = socket.local_addr()?;

        info!("Successfully bound to {}", local_addr);
        self.socket = Some(Arc::new(socket));
        Ok(local_addr)
    }

    /// Address the listener is bound to, once [`RelayListener::bind`] has run.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind and run the receive loop until shutdown
    pub async fn start(&mut self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if self.socket.is_none() {
            self.bind().await?;
        }
        self.recv_loop(shutdown_rx).await
    }

    /// Main datagram receive loop
    async fn recv_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let socket = self.socket.as_ref()
            .ok_or_else(|| anyhow!("Listener not bound"))?;

        info!("Starting datagram receive loop");
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                recv_result = socket.recv_from(&mut buf) => {
                    match recv_result {
                        Ok((len, peer)) => {
                            debug!(client_addr = %peer, len = len, "Received datagram");
                            self.engine.dispatch(&buf[..len], peer, socket);
                        }
                        Err(e) => {
                            // Transient receive failures must not stop the
                            // listener.
                            warn!(error = %e, "Failed to receive datagram");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Relay listener received shutdown signal, stopping");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::NullSink;
    use std::time::Duration;
    use tokio::time::sleep;

    /// Engine pointed at a bound but silent remote socket. The socket must
    /// stay alive for the test; a closed port answers with ICMP refusals
    /// that terminate sessions.
    async fn test_engine() -> (Arc<RelayEngine>, UdpSocket) {
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let engine = Arc::new(RelayEngine::new(
            "127.0.0.1:0".parse().unwrap(),
            remote.local_addr().unwrap(),
            Arc::new(NullSink),
        ));
        (engine, remote)
    }

    #[tokio::test]
    async fn bind_assigns_local_addr() {
        let (engine, _remote) = test_engine().await;
        let mut listener = RelayListener::new(engine, "127.0.0.1:0".parse().unwrap());
        assert_eq!(listener.local_addr(), None);

        let addr = listener.bind().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(listener.local_addr(), Some(addr));
    }

    #[tokio::test]
    async fn recv_loop_stops_on_shutdown() {
        let (engine, _remote) = test_engine().await;
        let mut listener = RelayListener::new(engine, "127.0.0.1:0".parse().unwrap());
        listener.bind().await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { listener.recv_loop(shutdown_rx).await });

        sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("listener did not stop after shutdown signal");
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn datagrams_reach_the_engine() {
        let (engine, remote) = test_engine().await;
        let mut listener = RelayListener::new(engine.clone(), "127.0.0.1:0".parse().unwrap());
        let addr = listener.bind().await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { listener.recv_loop(shutdown_rx).await });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", addr).await.unwrap();

        // The datagram must open a session and come out of its outbound
        // socket toward the remote.
        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), remote.recv_from(&mut buf))
            .await
            .expect("timed out waiting for forwarded datagram")
            .expect("receive failed");
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(engine.session_count(), 1);

        shutdown_tx.send(()).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}
