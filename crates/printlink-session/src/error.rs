//! Error types for sessions, the registry and config stores.

use crate::session::SessionState;
use printlink_core::{ConfigError, ConnectionId};
use printlink_protocol::ProtocolError;
use thiserror::Error;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation not allowed in the current state.
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// State at the time of the call.
        state: SessionState,
    },

    /// Payload could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Config store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document is not valid.
    #[error("Invalid store document: {0}")]
    Format(#[from] serde_json::Error),

    /// The same ID appears twice.
    #[error("Duplicate connection id in store: {0}")]
    DuplicateId(ConnectionId),
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No config with this ID.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// No open session for this ID.
    #[error("Not connected: {0}")]
    NotConnected(ConnectionId),

    /// The session closed before it opened.
    #[error("Connect failed: {0}")]
    ConnectFailed(ConnectionId),

    /// Invalid connection settings.
    #[error("Invalid connection config: {0}")]
    Config(#[from] ConfigError),

    /// Persistence failure.
    #[error("Config store error: {0}")]
    Store(#[from] StoreError),

    /// Session rejected the operation.
    #[error(transparent)]
    Session(#[from] SessionError),
}
