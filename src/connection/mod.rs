//! Connections to telemetry servers
//!
//! A [`Connector`] opens one [`Connection`] per attempt; the session owns the
//! connection exclusively and drops it on any I/O error before reconnecting.
//! [`tcp::TcpConnector`] is the production implementation; tests inject
//! scripted connectors to drive the session state machine.

pub mod tcp;


use crate::Result;
use crate::types::ServerTarget;

pub use tcp::{TcpConnection, TcpConnector};

/// Opens connections to a server.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector
    type Connection: Connection;

    /// Attempt a single connection to `target`.
    ///
    /// Returns:
    /// - `Ok(connection)` - Connected, I/O timeouts applied
    /// - `Err(e)` - Refused, unreachable or timed out; the caller backs off
    async fn connect(&self, target: &ServerTarget) -> Result<Self::Connection>;
}

/// A live, exclusively owned link to one server.
#[async_trait::async_trait]
pub trait Connection: Send + 'static {
    /// Send the one-byte liveness heartbeat.
    async fn send_heartbeat(&mut self, beat: u8) -> Result<()>;

    /// Read up to `buf.len()` bytes.
    ///
    /// `Ok(0)` means the peer sent nothing and closed its write side.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;
}
