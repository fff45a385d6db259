//! UDPPipe Library
//!
//! UDP relay with per-client session tracking
//!
//! Forwards datagrams arriving at one listening socket to a single fixed
//! remote endpoint over a dedicated outbound socket per client, and sends
//! the remote's replies back to the originating client address. Idle
//! sessions are reclaimed by a periodic sweep.

pub mod config;
pub mod listener;
pub mod metrics;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use listener::RelayListener;
pub use relay::{PacketSink, RelayEngine};
pub use shutdown::ShutdownCoordinator;

/// Common error type for the relay
pub type Result<T> = anyhow::Result<T>;
