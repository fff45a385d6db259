//! Packet Sink Contract

use anyhow::Error;

/// Observer interface for relayed traffic.
///
/// The engine reports every payload just before it is transmitted and every
/// failure it swallows. Implementations are side-effect only: nothing they
/// do feeds back into relay behavior, and they are invoked on the relay's
/// send and receive paths, so they must not block for any meaningful time.
pub trait PacketSink: Send + Sync {
    /// Called immediately before a payload is transmitted to the remote
    /// endpoint (client -> remote direction).
    fn on_inbound(&self, payload: &[u8]);

    /// Called immediately before a payload received from the remote endpoint
    /// is forwarded back to the client (remote -> client direction).
    fn on_outbound(&self, payload: &[u8]);

    /// Called on any I/O or session-management failure. Must not panic.
    fn on_error(&self, error: &Error);
}

/// Sink that discards every observation. Useful for tests and for running
/// the relay without telemetry.
#[derive(Debug, Default)]
pub struct NullSink;

impl PacketSink for NullSink {
    fn on_inbound(&self, _payload: &[u8]) {}

    fn on_outbound(&self, _payload: &[u8]) {}

    fn on_error(&self, _error: &Error) {}
}
