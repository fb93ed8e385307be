//! Topic naming for the event hub.
//!
//! Per-device topics follow `device:<id>:<channel>`. Registry mutations are
//! announced on the fixed `connection:*` topics.

use crate::connection::ConnectionId;
use std::fmt;

/// Maximum topic name length.
pub const MAX_TOPIC_LENGTH: usize = 256;

/// Topic that receives every published event.
pub const WILDCARD: &str = "*";

/// Published after a connection config is added.
pub const CONNECTION_ADDED: &str = "connection:added";

/// Published after a connection config is replaced.
pub const CONNECTION_UPDATED: &str = "connection:updated";

/// Published after a connection config is removed.
pub const CONNECTION_REMOVED: &str = "connection:removed";

/// Channels under a device's topic namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceChannel {
    /// Session state changes.
    Status,
    /// Inbound device payloads.
    Telemetry,
    /// Heartbeat acknowledgements and device heartbeat frames.
    Heartbeat,
    /// Liveness timeout.
    Timeout,
    /// Transport diagnostics.
    Error,
}

impl DeviceChannel {
    /// All device channels.
    pub const ALL: [DeviceChannel; 5] = [
        DeviceChannel::Status,
        DeviceChannel::Telemetry,
        DeviceChannel::Heartbeat,
        DeviceChannel::Timeout,
        DeviceChannel::Error,
    ];

    /// Channel name as used in topics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceChannel::Status => "status",
            DeviceChannel::Telemetry => "telemetry",
            DeviceChannel::Heartbeat => "heartbeat",
            DeviceChannel::Timeout => "timeout",
            DeviceChannel::Error => "error",
        }
    }

    /// Parse a channel name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for DeviceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic constructors and parsing.
pub struct Topic;

impl Topic {
    /// Build `device:<id>:<channel>`.
    #[must_use]
    pub fn device(id: &ConnectionId, channel: DeviceChannel) -> String {
        format!("device:{}:{}", id, channel.as_str())
    }

    /// Split a device topic into its connection id and channel.
    #[must_use]
    pub fn parse_device(topic: &str) -> Option<(ConnectionId, DeviceChannel)> {
        let rest = topic.strip_prefix("device:")?;
        let (id, channel) = rest.rsplit_once(':')?;
        if id.is_empty() {
            return None;
        }
        Some((ConnectionId::new(id), DeviceChannel::parse(channel)?))
    }

    /// The last `:`-separated segment of a topic, used as a metrics label.
    #[must_use]
    pub fn category(topic: &str) -> &str {
        topic.rsplit(':').next().unwrap_or(topic)
    }
}

/// Validate a topic name supplied by an external consumer.
///
/// # Errors
///
/// Returns an error message if the topic name is invalid.
pub fn validate_topic(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Topic name cannot be empty");
    }
    if name.len() > MAX_TOPIC_LENGTH {
        return Err("Topic name too long");
    }
    if name.starts_with('$') {
        return Err("Topic names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Topic name contains invalid characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_topic() {
        let id = ConnectionId::new("c1");
        assert_eq!(Topic::device(&id, DeviceChannel::Status), "device:c1:status");
        assert_eq!(Topic::device(&id, DeviceChannel::Timeout), "device:c1:timeout");
    }

    #[test]
    fn test_parse_device_topic() {
        let (id, channel) = Topic::parse_device("device:c12:telemetry").unwrap();
        assert_eq!(id.as_str(), "c12");
        assert_eq!(channel, DeviceChannel::Telemetry);

        assert!(Topic::parse_device("device::status").is_none());
        assert!(Topic::parse_device("device:c1:bogus").is_none());
        assert!(Topic::parse_device(CONNECTION_ADDED).is_none());
    }

    #[test]
    fn test_topic_category() {
        assert_eq!(Topic::category("device:c1:heartbeat"), "heartbeat");
        assert_eq!(Topic::category(CONNECTION_REMOVED), "removed");
        assert_eq!(Topic::category(WILDCARD), "*");
    }

    #[test]
    fn test_topic_validation() {
        assert!(validate_topic("device:c1:status").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("$system").is_err());
        assert!(validate_topic("bad\nname").is_err());

        let long_name = "a".repeat(MAX_TOPIC_LENGTH + 1);
        assert!(validate_topic(&long_name).is_err());
    }
}
