//! TCP connector with bounded connect, send and read

use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{Connection, Connector};
use crate::types::ServerTarget;
use crate::{IngestError, Result};

/// Opens plain TCP connections, applying one timeout to connect, send and read.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    io_timeout: Duration,
}

impl TcpConnector {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    type Connection = TcpConnection;

    async fn connect(&self, target: &ServerTarget) -> Result<TcpConnection> {
        let address = target.address.to_string();
        debug!(server = %target.name, %address, "Connecting");

        let connect = TcpStream::connect((target.address.host.as_str(), target.address.port));
        let stream = bounded(self.io_timeout, "connect", connect)
            .await?
            .map_err(|e| IngestError::connect_error(address.clone(), e))?;

        // Heartbeats are single bytes; do not let Nagle hold them back.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(server = %target.name, "Failed to set TCP_NODELAY: {}", e);
        }

        info!(server = %target.name, %address, "Connected to server");
        Ok(TcpConnection { stream, io_timeout: self.io_timeout })
    }
}

/// An open TCP stream to one server.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    io_timeout: Duration,
}

#[async_trait::async_trait]
impl Connection for TcpConnection {
    async fn send_heartbeat(&mut self, beat: u8) -> Result<()> {
        bounded(self.io_timeout, "send", self.stream.write_all(&[beat]))
            .await?
            .map_err(|e| IngestError::io("send", e))
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        bounded(self.io_timeout, "read", self.stream.read(buf))
            .await?
            .map_err(|e| IngestError::io("read", e))
    }
}

async fn bounded<F: Future>(duration: Duration, operation: &'static str, fut: F) -> Result<F::Output> {
    tokio::time::timeout(duration, fut).await.map_err(|_| IngestError::Timeout { operation, duration })
}
