//! Connection configuration model.
//!
//! A [`ConnectionConfig`] is the persisted description of a printer endpoint.
//! It is created from a [`ConnectionDraft`] (user input, not yet validated)
//! and lives until it is explicitly removed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque identifier of a configured connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the `n`th sequential ID (`c1`, `c2`, ...).
    #[must_use]
    pub fn sequential(n: u64) -> Self {
        Self(format!("c{}", n))
    }

    /// The numeric suffix of a sequential ID, if it is one.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.0.strip_prefix('c')?.parse().ok()
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Host is empty.
    #[error("Host cannot be empty")]
    EmptyHost,

    /// A port is outside `0..=65535`.
    #[error("Invalid {field}: {value} (expected 0-65535)")]
    InvalidPort {
        /// Which port field was rejected.
        field: &'static str,
        /// The rejected value.
        value: i64,
    },
}

/// Unvalidated connection settings, as received from a caller.
///
/// Ports are wide signed integers so that out-of-range input can be
/// represented and rejected with a proper error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDraft {
    /// Network address of the printer.
    pub host: String,
    /// Telemetry socket port.
    pub control_port: i64,
    /// Optional auxiliary port (camera stream).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux_port: Option<i64>,
}

impl ConnectionDraft {
    /// Create a draft without an auxiliary port.
    #[must_use]
    pub fn new(host: impl Into<String>, control_port: i64) -> Self {
        Self {
            host: host.into(),
            control_port,
            aux_port: None,
        }
    }

    /// Set the auxiliary port.
    #[must_use]
    pub fn with_aux_port(mut self, port: i64) -> Self {
        self.aux_port = Some(port);
        self
    }

    /// Validate the draft and bind it to an ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty or a port is out of range.
    pub fn validate(self, id: ConnectionId) -> Result<ConnectionConfig, ConfigError> {
        let host = self.host.trim().to_string();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        let control_port = to_port("controlPort", self.control_port)?;
        let aux_port = self
            .aux_port
            .map(|p| to_port("auxPort", p))
            .transpose()?;

        Ok(ConnectionConfig {
            id,
            host,
            control_port,
            aux_port,
        })
    }
}

fn to_port(field: &'static str, value: i64) -> Result<u16, ConfigError> {
    u16::try_from(value).map_err(|_| ConfigError::InvalidPort { field, value })
}

/// Persisted description of a printer endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Network address of the printer.
    pub host: String,
    /// Telemetry socket port.
    pub control_port: u16,
    /// Optional auxiliary port (camera stream).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux_port: Option<u16>,
}

impl ConnectionConfig {
    /// `host:port` of the telemetry socket.
    #[must_use]
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.host, self.control_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let id = ConnectionId::sequential(7);
        assert_eq!(id.as_str(), "c7");
        assert_eq!(id.sequence(), Some(7));
        assert_eq!(ConnectionId::new("printer-a").sequence(), None);
    }

    #[test]
    fn test_validate_draft() {
        let config = ConnectionDraft::new(" 127.0.0.1 ", 9999)
            .with_aux_port(8080)
            .validate(ConnectionId::new("c1"))
            .unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.control_port, 9999);
        assert_eq!(config.aux_port, Some(8080));
        assert_eq!(config.control_addr(), "127.0.0.1:9999");
    }

    #[test]
    fn test_port_bounds() {
        let id = ConnectionId::new("c1");
        assert!(ConnectionDraft::new("h", 0).validate(id.clone()).is_ok());
        assert!(ConnectionDraft::new("h", 65535).validate(id.clone()).is_ok());

        assert_eq!(
            ConnectionDraft::new("h", 65536).validate(id.clone()),
            Err(ConfigError::InvalidPort {
                field: "controlPort",
                value: 65536
            })
        );
        assert_eq!(
            ConnectionDraft::new("h", 80).with_aux_port(-1).validate(id.clone()),
            Err(ConfigError::InvalidPort {
                field: "auxPort",
                value: -1
            })
        );
        assert_eq!(
            ConnectionDraft::new("  ", 80).validate(id),
            Err(ConfigError::EmptyHost)
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = ConnectionDraft::new("10.0.0.5", 9999)
            .validate(ConnectionId::new("c3"))
            .unwrap();
        let json = serde_json::to_value(&config).unwrap();

        assert_eq!(json["id"], "c3");
        assert_eq!(json["controlPort"], 9999);
        assert!(json.get("auxPort").is_none());

        let back: ConnectionConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
