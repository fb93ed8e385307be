//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`PRINTLINK_HOST`, `PRINTLINK_PORT`)
//! - TOML configuration file (`printlink.toml`)

use anyhow::{Context, Result};
use printlink_session::{Backoff, SessionConfig};
use printlink_transport::WebSocketConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind the HTTP API to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the HTTP API.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connection config persistence.
    #[serde(default)]
    pub store: StoreConfig,

    /// Liveness monitoring.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Reconnect policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Printer link settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Connection config persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON document holding the connection configs. `~` is expanded.
    #[serde(default = "default_store_path")]
    pub path: String,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// How often each session checks for silence, in milliseconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,

    /// Silence after which a session is closed, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,

    /// Keepalive interval in milliseconds, 0 disables keepalives.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,
}

/// Reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Connect every stored connection at startup.
    #[serde(default)]
    pub autoconnect: bool,

    /// Unit delay in milliseconds.
    #[serde(default = "default_reconnect_base")]
    pub base_ms: u64,

    /// Upper bound of a single delay in milliseconds.
    #[serde(default = "default_reconnect_max_delay")]
    pub max_delay_ms: u64,

    /// Largest doubling exponent.
    #[serde(default = "default_max_exponent")]
    pub max_exponent: u32,

    /// Attempts per connect, unlimited when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Printer link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Timeout for opening a printer link, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("PRINTLINK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("PRINTLINK_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8480)
}

fn default_true() -> bool {
    true
}

fn default_store_path() -> String {
    "~/.config/printlink/connections.json".to_string()
}

fn default_check_interval() -> u64 {
    5_000
}

fn default_heartbeat_timeout() -> u64 {
    45_000
}

fn default_keepalive_interval() -> u64 {
    30_000
}

fn default_reconnect_base() -> u64 {
    1_000
}

fn default_reconnect_max_delay() -> u64 {
    60_000
}

fn default_max_exponent() -> u32 {
    6
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_max_message_size() -> usize {
    printlink_protocol::MAX_FRAME_SIZE
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            store: StoreConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            transport: TransportConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval(),
            timeout_ms: default_heartbeat_timeout(),
            keepalive_interval_ms: default_keepalive_interval(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            autoconnect: false,
            base_ms: default_reconnect_base(),
            max_delay_ms: default_reconnect_max_delay(),
            max_exponent: default_max_exponent(),
            max_attempts: None,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "printlink.toml",
            "/etc/printlink/printlink.toml",
            "~/.config/printlink/printlink.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Store path with `~` expanded.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.store.path).as_ref())
    }

    /// Session timing derived from the heartbeat section.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let keepalive = self.heartbeat.keepalive_interval_ms;
        SessionConfig {
            check_interval: Duration::from_millis(self.heartbeat.check_interval_ms.max(1)),
            timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            keepalive_interval: (keepalive > 0).then(|| Duration::from_millis(keepalive)),
        }
    }

    /// Reconnect policy derived from the reconnect section.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.reconnect.base_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_exponent: self.reconnect.max_exponent,
            max_attempts: self.reconnect.max_attempts,
        }
    }

    /// WebSocket transport settings.
    #[must_use]
    pub fn websocket(&self) -> WebSocketConfig {
        WebSocketConfig {
            connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
            max_message_size: self.transport.max_message_size,
        }
    }
}
