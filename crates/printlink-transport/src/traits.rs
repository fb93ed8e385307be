//! Transport abstraction traits.
//!
//! These traits define the interface that all transport implementations must
//! provide, so sessions can be driven by a real socket or a test double.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Network location of a printer's telemetry socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// WebSocket URL for this endpoint.
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection attempt timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to establish the connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] printlink_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A transport that can open connections to printers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection.
    ///
    /// Resolves once the link is open, or with the reason it could not be.
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket", "mock").
    fn name(&self) -> &'static str;
}

/// An open connection to a printer.
///
/// A connection is owned by exactly one session and driven from that
/// session's task, so methods take `&mut self`.
#[async_trait]
pub trait Connection: Send {
    /// Receive the next text frame.
    ///
    /// Returns `None` if the connection is closed cleanly. Must be cancel
    /// safe: dropping the future before it completes loses no frame.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Send a text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let endpoint = Endpoint::new("192.168.1.20", 9999);
        assert_eq!(endpoint.ws_url(), "ws://192.168.1.20:9999");
        assert_eq!(endpoint.to_string(), "192.168.1.20:9999");
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::ConnectFailed("refused".into());
        assert_eq!(err.to_string(), "Connect failed: refused");
    }
}
