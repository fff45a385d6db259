//! Graceful Shutdown Handling
//!
//! This module provides utilities for handling graceful shutdown of the relay.
//! It supports SIGTERM and SIGINT signals and ensures active sessions are closed cleanly.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};
use tokio::signal;
use tracing::{info, warn};
use crate::relay::RelayEngine;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Notification for shutdown completion
    shutdown_complete: Arc<Notify>,
    /// Shutdown timeout duration
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_complete = Arc::new(Notify::new());

        Self {
            shutdown_tx,
            shutdown_complete,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get a handle to wait for shutdown completion
    pub fn completion_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown_complete)
    }

    /// Start listening for shutdown signals (SIGTERM, SIGINT)
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        // Send shutdown signal to all components
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        Ok(())
    }

    /// Perform graceful shutdown of the relay engine. Session close is
    /// synchronous, so unlike a stream proxy there is no drain phase: every
    /// session is torn down and its socket released before this returns.
    pub async fn shutdown_relay(&self, engine: &RelayEngine) -> Result<()> {
        info!("Initiating graceful shutdown of relay engine");
        let start_time = Instant::now();

        let active = engine.session_count();
        if active > 0 {
            info!("Closing {} active relay sessions", active);
        }
        engine.shutdown();

        info!("All relay sessions closed in {:?}", start_time.elapsed());

        // Notify that shutdown is complete
        self.shutdown_complete.notify_waiters();

        Ok(())
    }

    /// Wait for shutdown completion with timeout
    pub async fn wait_for_completion(&self) -> Result<()> {
        tokio::time::timeout(
            self.timeout + Duration::from_secs(5), // Extra buffer for cleanup
            self.shutdown_complete.notified()
        ).await
        .map_err(|_| anyhow::anyhow!("Shutdown completion timeout"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::NullSink;
    use std::net::SocketAddr;
    use tokio::net::UdpSocket;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_shutdown_coordinator_creation() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let _receiver = coordinator.subscribe();
        let _completion = coordinator.completion_handle();

        // Should not panic
    }

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut receiver = coordinator.subscribe();

        // Send shutdown signal
        coordinator.shutdown_tx.send(()).unwrap();

        // Should receive the signal
        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_relay_closes_sessions() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let reply = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        // Bound but silent remote; the session must still be alive when
        // shutdown tears it down.
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let engine = RelayEngine::new(
            reply.local_addr().unwrap(),
            remote.local_addr().unwrap(),
            Arc::new(NullSink),
        );

        let peer: SocketAddr = "127.0.0.1:43000".parse().unwrap();
        engine.dispatch(b"traffic", peer, &reply);
        assert_eq!(engine.session_count(), 1);
        let session = engine.session(&peer).unwrap();

        let completion = coordinator.completion_handle();
        let waiter = tokio::spawn(async move { completion.notified().await });
        // Give the waiter a chance to register before notifying.
        sleep(Duration::from_millis(50)).await;
        assert!(!session.is_closed());

        coordinator.shutdown_relay(&engine).await.unwrap();
        assert!(session.is_closed());
        assert_eq!(engine.session_count(), 0);
        waiter.await.unwrap();
    }
}
