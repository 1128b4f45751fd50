//! Socket primitives used by the query connection.
//!
//! [`Connector`] and [`Transport`] are the seam between protocol handling and
//! the operating system. The TCP implementation lives here; tests use
//! [`crate::testing::FakeServer`] instead.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Errors from the socket layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    #[error("connection closed by server")]
    Closed,
}

/// A bidirectional byte stream to the query port.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Write a complete frame.
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receive up to `max` bytes, waiting at most `wait`.
    ///
    /// Returns `Ok(None)` when nothing arrived before the deadline.
    async fn recv(&mut self, max: usize, wait: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Close the stream. Errors are ignored.
    async fn shutdown(&mut self);
}

/// Creates fresh transports; called once per (re)connect.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Transport: Transport;

    /// Open a new transport, giving up after `timeout`.
    async fn connect(&mut self, timeout: Duration) -> Result<Self::Transport, TransportError>;

    /// Human-readable peer address for logs.
    fn peer(&self) -> String;
}

/// Connects to the query port over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    /// Create a connector for `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&mut self, timeout: Duration) -> Result<TcpTransport, TransportError> {
        let addr = self.peer();
        let stream = tokio::time::timeout(timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| TransportError::Timeout(addr.clone()))?
            .map_err(|source| TransportError::Connect {
                addr: addr.clone(),
                source,
            })?;

        // Commands are tiny and latency-sensitive
        stream.set_nodelay(true).map_err(TransportError::Io)?;
        debug!("TCP connection established to {}", addr);
        Ok(TcpTransport { stream })
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A TCP stream to the query port.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(frame).await.map_err(TransportError::Io)
    }

    async fn recv(&mut self, max: usize, wait: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = vec![0u8; max];
        match tokio::time::timeout(wait, self.stream.read(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => Err(TransportError::Closed),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Error shutting down TCP stream: {}", e);
        }
    }
}
