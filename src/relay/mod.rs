//! UDP Relay
//!
//! Forwards datagrams between many clients and one fixed remote endpoint,
//! tracking a session per client address.

pub mod engine;
pub mod session;
pub mod sink;
pub mod table;

pub use engine::RelayEngine;
pub use session::Session;
pub use sink::{NullSink, PacketSink};
pub use table::SessionTable;
