//! Session Table
//!
//! Shared map from client address to live session. Lookup-or-create runs
//! under a single lock so two datagrams from the same new client can never
//! race into two sessions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::session::Session;

/// Cloneable handle to the shared session map.
#[derive(Clone, Default)]
pub struct SessionTable {
    sessions: Arc<Mutex<HashMap<SocketAddr, Arc<Session>>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the session for `addr`.
    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(addr).cloned()
    }

    /// Look up the session for `addr`, creating and starting one with
    /// `factory` if none exists. Returns the session and whether it was
    /// just created. Insertion and startup happen under the map lock;
    /// startup only spawns a task, so the lock is never held across I/O.
    pub fn get_or_create<F>(&self, addr: SocketAddr, factory: F) -> (Arc<Session>, bool)
    where
        F: FnOnce() -> Arc<Session>,
    {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get(&addr) {
            return (session.clone(), false);
        }

        let session = factory();
        sessions.insert(addr, session.clone());
        session.start();
        (session, true)
    }

    /// Remove the entry for `addr` only if it still holds the session with
    /// the given id. A closing session uses this to take itself out of the
    /// table without ever displacing a successor created for the same
    /// address.
    pub(crate) fn remove_if_current(&self, addr: &SocketAddr, id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get(addr) {
            Some(current) if current.id() == id => {
                sessions.remove(addr);
                true
            }
            _ => false,
        }
    }

    /// Evict every expired session. Removal happens in one pass under the
    /// lock; the evicted sessions are closed after the lock is released,
    /// with notification suppressed since their entries are already gone.
    pub fn sweep_expired(&self) -> usize {
        let evicted: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().unwrap();
            let mut evicted = Vec::new();
            sessions.retain(|_, session| {
                if session.is_expired() {
                    evicted.push(session.clone());
                    false
                } else {
                    true
                }
            });
            evicted
        };

        for session in &evicted {
            session.close(false);
        }
        evicted.len()
    }

    /// Close every session and clear the table.
    pub fn close_all(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.drain().map(|(_, session)| session).collect()
        };
        for session in &drained {
            session.close(false);
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::sink::NullSink;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    async fn make_session(table: &SessionTable, client: SocketAddr, ttl: Duration) -> Arc<Session> {
        let reply = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        Session::new(
            client,
            "127.0.0.1:9".parse().unwrap(),
            reply,
            Arc::new(NullSink),
            table.clone(),
            ttl,
            2048,
        )
    }

    #[tokio::test]
    async fn get_or_create_reuses_existing_session() {
        let table = SessionTable::new();
        let client: SocketAddr = "127.0.0.1:41000".parse().unwrap();

        let first = make_session(&table, client, Duration::from_secs(30)).await;
        let (created, fresh) = table.get_or_create(client, || first.clone());
        assert!(fresh);

        let replacement = make_session(&table, client, Duration::from_secs(30)).await;
        let (looked_up, fresh) = table.get_or_create(client, || replacement.clone());
        assert!(!fresh);
        assert_eq!(looked_up.id(), created.id());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn remove_if_current_spares_successor() {
        let table = SessionTable::new();
        let client: SocketAddr = "127.0.0.1:41001".parse().unwrap();

        let old = make_session(&table, client, Duration::from_secs(30)).await;
        let successor = make_session(&table, client, Duration::from_secs(30)).await;
        table.get_or_create(client, || successor.clone());

        // Stale identity: the entry now belongs to the successor.
        assert!(!table.remove_if_current(&client, old.id()));
        assert_eq!(table.len(), 1);

        assert!(table.remove_if_current(&client, successor.id()));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn sweep_evicts_only_expired_sessions() {
        let table = SessionTable::new();
        let stale_addr: SocketAddr = "127.0.0.1:41002".parse().unwrap();
        let live_addr: SocketAddr = "127.0.0.1:41003".parse().unwrap();

        let stale = make_session(&table, stale_addr, Duration::ZERO).await;
        let live = make_session(&table, live_addr, Duration::from_secs(3600)).await;
        table.get_or_create(stale_addr, || stale.clone());
        table.get_or_create(live_addr, || live.clone());

        assert_eq!(table.sweep_expired(), 1);
        assert!(stale.is_closed());
        assert!(!live.is_closed());
        assert_eq!(table.len(), 1);
        assert!(table.get(&live_addr).is_some());
    }

    #[tokio::test]
    async fn close_all_drains_the_table() {
        let table = SessionTable::new();
        let a_addr: SocketAddr = "127.0.0.1:41004".parse().unwrap();
        let b_addr: SocketAddr = "127.0.0.1:41005".parse().unwrap();

        let a = make_session(&table, a_addr, Duration::from_secs(3600)).await;
        let b = make_session(&table, b_addr, Duration::from_secs(3600)).await;
        table.get_or_create(a_addr, || a.clone());
        table.get_or_create(b_addr, || b.clone());

        table.close_all();
        assert!(table.is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
