//! Relay Session
//!
//! One session per client address: a dedicated outbound socket associated
//! with the fixed remote endpoint, a FIFO queue of payloads awaiting
//! transmission, and a receive loop forwarding the remote's replies back to
//! the client through the shared listening socket.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::sink::PacketSink;
use super::table::SessionTable;

/// Tasks owned by one session. Registration after the set is finished
/// aborts the task immediately, so a task spawned concurrently with a close
/// can never outlive the session.
#[derive(Default)]
struct TaskSet {
    handles: Vec<JoinHandle<()>>,
    finished: bool,
}

impl TaskSet {
    fn register(&mut self, handle: JoinHandle<()>) {
        if self.finished {
            handle.abort();
        } else {
            self.handles.push(handle);
        }
    }

    fn abort_all(&mut self) {
        self.finished = true;
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

/// Forwarding state for a single client address.
///
/// Lifecycle: `start` spawns the startup task, which creates and associates
/// the outbound socket, then runs the send and receive loops until an I/O
/// failure, a zero-length receive from the remote, an explicit close, or
/// idle eviction. Closing is idempotent and releases the outbound socket
/// exactly once; every loop checks the closed flag before acting, so
/// completions racing with a close degrade to no-ops.
pub struct Session {
    id: Uuid,
    client_addr: SocketAddr,
    remote_addr: SocketAddr,
    reply_socket: Arc<UdpSocket>,
    sink: Arc<dyn PacketSink>,
    table: SessionTable,
    ttl: Duration,
    buffer_size: usize,
    queue_tx: mpsc::UnboundedSender<Bytes>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    outbound: Mutex<Option<Arc<UdpSocket>>>,
    expiry: Mutex<Instant>,
    connected: AtomicBool,
    closed: AtomicBool,
    tasks: Mutex<TaskSet>,
}

impl Session {
    /// Create a new session for `client_addr`. The session is inert until
    /// [`Session::start`] is called.
    pub fn new(
        client_addr: SocketAddr,
        remote_addr: SocketAddr,
        reply_socket: Arc<UdpSocket>,
        sink: Arc<dyn PacketSink>,
        table: SessionTable,
        ttl: Duration,
        buffer_size: usize,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        debug!(
            session_id = %id,
            client_addr = %client_addr,
            remote_addr = %remote_addr,
            "creating relay session"
        );

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            id,
            client_addr,
            remote_addr,
            reply_socket,
            sink,
            table,
            ttl,
            buffer_size,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            outbound: Mutex::new(None),
            expiry: Mutex::new(Instant::now() + ttl),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(TaskSet::default()),
        })
    }

    /// Session identity, fresh for every instance. A client address that is
    /// evicted and later re-creates a session gets a new id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The client address this session forwards for.
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// True once the outbound socket is associated with the remote endpoint.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// True after the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// True once the session has seen no activity for a full TTL window.
    pub fn is_expired(&self) -> bool {
        *self.expiry.lock().unwrap() <= Instant::now()
    }

    fn refresh_expiry(&self) {
        *self.expiry.lock().unwrap() = Instant::now() + self.ttl;
    }

    fn register_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().unwrap().register(handle);
    }

    fn report_error(&self, error: anyhow::Error) {
        warn!(
            session_id = %self.id,
            client_addr = %self.client_addr,
            error = %error,
            "session error"
        );
        self.sink.on_error(&error);
    }

    /// Spawn the startup task: associate the outbound socket, then run the
    /// send and receive loops.
    pub fn start(self: &Arc<Self>) {
        let session = self.clone();
        let handle = tokio::spawn(async move { session.run().await });
        self.register_task(handle);
    }

    /// Append one payload to the outbound queue.
    ///
    /// The payload is copied, so the caller may reuse its buffer as soon as
    /// this returns. Payloads queued while the association is still in
    /// progress are drained once it completes. An empty payload is an
    /// explicit close signal and is never queued. Enqueueing on a closed
    /// session is a silent no-op; the table entry is already gone or about
    /// to go, and the next datagram will create a fresh session.
    pub fn enqueue(&self, payload: &[u8]) {
        if self.is_closed() {
            debug!(
                session_id = %self.id,
                client_addr = %self.client_addr,
                "dropping datagram for closed session"
            );
            return;
        }

        if payload.is_empty() {
            debug!(
                session_id = %self.id,
                client_addr = %self.client_addr,
                "zero-length payload, closing session"
            );
            self.close(true);
            return;
        }

        // A failed send means the receiver was dropped by a concurrent
        // close; the payload is discarded like any other post-close packet.
        let _ = self.queue_tx.send(Bytes::copy_from_slice(payload));
    }

    async fn run(self: Arc<Self>) {
        self.refresh_expiry();

        let socket = match self.associate().await {
            Ok(socket) => Arc::new(socket),
            Err(error) => {
                self.report_error(error);
                self.close(true);
                return;
            }
        };

        *self.outbound.lock().unwrap() = Some(socket.clone());
        self.connected.store(true, Ordering::SeqCst);

        if self.is_closed() {
            // Lost the race against a concurrent close; the socket must not
            // outlive it.
            self.outbound.lock().unwrap().take();
            return;
        }

        debug!(
            session_id = %self.id,
            client_addr = %self.client_addr,
            remote_addr = %self.remote_addr,
            local_addr = ?socket.local_addr().ok(),
            "session associated, piping"
        );

        let queue_rx = self.queue_rx.lock().unwrap().take();
        let queue_rx = match queue_rx {
            Some(rx) => rx,
            // Queue already discarded by a concurrent close.
            None => return,
        };

        let send_task = {
            let session = self.clone();
            let socket = socket.clone();
            tokio::spawn(async move { session.send_loop(socket, queue_rx).await })
        };
        let recv_task = {
            let session = self.clone();
            tokio::spawn(async move { session.recv_loop(socket).await })
        };
        self.register_task(send_task);
        self.register_task(recv_task);
    }

    /// Create the outbound socket and associate it with the remote endpoint.
    async fn associate(&self) -> crate::Result<UdpSocket> {
        let bind_addr = match self.remote_addr {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("failed to bind outbound socket")?;
        socket
            .connect(self.remote_addr)
            .await
            .with_context(|| format!("failed to associate with {}", self.remote_addr))?;

        Ok(socket)
    }

    /// Drain the queue toward the remote endpoint, strictly in arrival
    /// order. This task is the only consumer of the queue, which makes the
    /// single-in-flight guarantee structural: the next payload is not even
    /// dequeued until the previous transmission completed.
    async fn send_loop(self: Arc<Self>, socket: Arc<UdpSocket>, mut queue_rx: mpsc::UnboundedReceiver<Bytes>) {
        while let Some(payload) = queue_rx.recv().await {
            if self.is_closed() {
                break;
            }

            self.sink.on_inbound(&payload);

            match socket.send(&payload).await {
                Ok(_) => self.refresh_expiry(),
                Err(error) => {
                    if !self.is_closed() {
                        self.report_error(
                            anyhow::Error::new(error)
                                .context(format!("send to {} failed", self.remote_addr)),
                        );
                    }
                    self.close(true);
                    break;
                }
            }
        }
    }

    /// Receive from the remote endpoint and forward each datagram to the
    /// client through the shared listening socket. A zero-length receive is
    /// the remote's end-of-stream signal and closes the session without an
    /// error report.
    async fn recv_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            match socket.recv(&mut buf).await {
                Ok(0) => {
                    debug!(
                        session_id = %self.id,
                        client_addr = %self.client_addr,
                        "zero-length receive from remote, closing session"
                    );
                    self.close(true);
                    break;
                }
                Ok(n) => {
                    if self.is_closed() {
                        break;
                    }
                    self.refresh_expiry();
                    self.sink.on_outbound(&buf[..n]);
                    if let Err(error) = self.reply_socket.send_to(&buf[..n], self.client_addr).await {
                        if !self.is_closed() {
                            self.report_error(
                                anyhow::Error::new(error)
                                    .context(format!("send to client {} failed", self.client_addr)),
                            );
                        }
                        self.close(true);
                        break;
                    }
                }
                Err(error) => {
                    if !self.is_closed() {
                        self.report_error(
                            anyhow::Error::new(error)
                                .context(format!("receive from {} failed", self.remote_addr)),
                        );
                    }
                    self.close(true);
                    break;
                }
            }
        }
    }

    /// Tear the session down: stop both loops, discard the queue, and
    /// release the outbound socket. Idempotent; only the first call has any
    /// effect. With `notify` the session removes its own table entry
    /// (identity-checked, so a successor session for the same address is
    /// never touched); the sweep passes `notify = false` because it removes
    /// entries itself.
    pub fn close(&self, notify: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.tasks.lock().unwrap().abort_all();
        self.outbound.lock().unwrap().take();
        self.queue_rx.lock().unwrap().take();

        debug!(
            session_id = %self.id,
            client_addr = %self.client_addr,
            notify = notify,
            "session closed"
        );

        if notify {
            self.table.remove_if_current(&self.client_addr, self.id);
        }
    }
}
