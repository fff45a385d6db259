//! Relay Engine

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::session::Session;
use super::sink::PacketSink;
use super::table::SessionTable;

/// Idle lifetime granted to a session by each activity refresh.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30);

/// Interval between idle-session eviction sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Receive buffer size for per-session outbound sockets.
pub const DEFAULT_BUFFER_SIZE: usize = 16384;

/// Fans client datagrams out to per-client sessions toward one fixed
/// remote endpoint.
///
/// `dispatch` always accepts: per-session failures are reported through
/// the packet sink and end only the affected session, never the engine.
pub struct RelayEngine {
    listen_addr: SocketAddr,
    remote_addr: SocketAddr,
    session_ttl: Duration,
    sweep_interval: Duration,
    buffer_size: usize,
    sink: Arc<dyn PacketSink>,
    table: SessionTable,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RelayEngine {
    /// Create a new relay engine with default timings.
    pub fn new(listen_addr: SocketAddr, remote_addr: SocketAddr, sink: Arc<dyn PacketSink>) -> Self {
        Self::with_settings(
            listen_addr,
            remote_addr,
            sink,
            DEFAULT_SESSION_TTL,
            DEFAULT_SWEEP_INTERVAL,
            DEFAULT_BUFFER_SIZE,
        )
    }

    /// Create a new relay engine with custom timings.
    pub fn with_settings(
        listen_addr: SocketAddr,
        remote_addr: SocketAddr,
        sink: Arc<dyn PacketSink>,
        session_ttl: Duration,
        sweep_interval: Duration,
        buffer_size: usize,
    ) -> Self {
        Self {
            listen_addr,
            remote_addr,
            session_ttl,
            sweep_interval,
            buffer_size,
            sink,
            table: SessionTable::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Create a new relay engine from configuration.
    pub fn from_config(
        config: &crate::config::Config,
        remote_addr: SocketAddr,
        sink: Arc<dyn PacketSink>,
    ) -> Self {
        Self::with_settings(
            config.server.listen_addr,
            remote_addr,
            sink,
            config.relay.session_ttl,
            config.relay.sweep_interval,
            config.relay.buffer_size,
        )
    }

    /// Route one client datagram to its session, creating the session on
    /// first contact. A zero-length payload is an explicit close signal for
    /// the peer's session; if the peer has none, it is ignored.
    ///
    /// Always returns `true`: acceptance is unconditional, and any later
    /// failure is reported through the sink.
    pub fn dispatch(&self, payload: &[u8], peer: SocketAddr, reply_socket: &Arc<UdpSocket>) -> bool {
        if payload.is_empty() {
            if let Some(session) = self.table.get(&peer) {
                debug!(client_addr = %peer, "zero-length dispatch, closing session");
                session.close(true);
            }
            return true;
        }

        let (session, created) = self.table.get_or_create(peer, || {
            Session::new(
                peer,
                self.remote_addr,
                reply_socket.clone(),
                self.sink.clone(),
                self.table.clone(),
                self.session_ttl,
                self.buffer_size,
            )
        });

        if created {
            self.ensure_sweeper();
            info!(
                session_id = %session.id(),
                client_addr = %peer,
                remote_addr = %self.remote_addr,
                active_sessions = self.table.len(),
                "new relay session"
            );
        }

        session.enqueue(payload);
        true
    }

    /// Spawn the eviction sweeper if it is not running yet. The sweeper
    /// starts with the first session and runs for the engine's lifetime.
    fn ensure_sweeper(&self) {
        let mut sweeper = self.sweeper.lock().unwrap();
        if sweeper.is_some() {
            return;
        }

        let table = self.table.clone();
        let sweep_interval = self.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                let evicted = table.sweep_expired();
                if evicted > 0 {
                    debug!(
                        evicted = evicted,
                        active_sessions = table.len(),
                        "evicted idle sessions"
                    );
                }
            }
        }));
    }

    /// The local address clients send to. Informational; the reply socket
    /// itself is supplied with every dispatch.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// The fixed remote endpoint all sessions forward to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.table.len()
    }

    /// Look up the live session for a client address.
    pub fn session(&self, addr: &SocketAddr) -> Option<Arc<Session>> {
        self.table.get(addr)
    }

    /// Stop the sweeper and close every session.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }

        let active = self.table.len();
        if active > 0 {
            info!(active_sessions = active, "closing all relay sessions");
        }
        self.table.close_all();
    }
}

impl Drop for RelayEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::sink::NullSink;

    /// Engine pointed at a bound but silent remote so sessions stay alive;
    /// an unbound port would answer sends with ICMP refusals.
    async fn test_engine() -> (RelayEngine, Arc<UdpSocket>, UdpSocket) {
        let reply = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let engine = RelayEngine::new(
            reply.local_addr().unwrap(),
            remote.local_addr().unwrap(),
            Arc::new(NullSink),
        );
        (engine, reply, remote)
    }

    #[tokio::test]
    async fn dispatch_creates_one_session_per_peer() {
        let (engine, reply, _remote) = test_engine().await;
        let peer: SocketAddr = "127.0.0.1:42000".parse().unwrap();

        assert!(engine.dispatch(b"first", peer, &reply));
        assert_eq!(engine.session_count(), 1);
        let id = engine.session(&peer).unwrap().id();

        assert!(engine.dispatch(b"second", peer, &reply));
        assert_eq!(engine.session_count(), 1);
        assert_eq!(engine.session(&peer).unwrap().id(), id);

        let other: SocketAddr = "127.0.0.1:42001".parse().unwrap();
        assert!(engine.dispatch(b"third", other, &reply));
        assert_eq!(engine.session_count(), 2);
    }

    #[tokio::test]
    async fn zero_length_dispatch_closes_existing_session() {
        let (engine, reply, _remote) = test_engine().await;
        let peer: SocketAddr = "127.0.0.1:42002".parse().unwrap();

        engine.dispatch(b"open", peer, &reply);
        let session = engine.session(&peer).unwrap();

        assert!(engine.dispatch(b"", peer, &reply));
        assert!(session.is_closed());
        assert_eq!(engine.session_count(), 0);
    }

    #[tokio::test]
    async fn zero_length_dispatch_without_session_is_accepted() {
        let (engine, reply, _remote) = test_engine().await;
        let peer: SocketAddr = "127.0.0.1:42003".parse().unwrap();

        assert!(engine.dispatch(b"", peer, &reply));
        assert_eq!(engine.session_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_all_sessions() {
        let (engine, reply, _remote) = test_engine().await;
        let a: SocketAddr = "127.0.0.1:42004".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:42005".parse().unwrap();

        engine.dispatch(b"a", a, &reply);
        engine.dispatch(b"b", b, &reply);
        let session_a = engine.session(&a).unwrap();
        let session_b = engine.session(&b).unwrap();

        engine.shutdown();
        assert_eq!(engine.session_count(), 0);
        assert!(session_a.is_closed());
        assert!(session_b.is_closed());
    }
}
