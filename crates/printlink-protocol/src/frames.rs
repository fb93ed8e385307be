//! Frame types for the printer link.
//!
//! Inbound frames are classified once, here, so that everything above the
//! protocol layer works with a closed set of categories.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Literal payload a printer sends to acknowledge a heartbeat.
pub const HEARTBEAT_ACK: &str = "ok";

/// Key that marks a device heartbeat frame.
pub const MODE_CODE_KEY: &str = "ModeCode";

/// `ModeCode` value of a heartbeat frame.
pub const HEARTBEAT_MODE: &str = "heart_beat";

/// Category of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameCategory {
    /// Liveness-only traffic.
    Heartbeat,
    /// Structured device data.
    Telemetry,
}

impl FrameCategory {
    /// Name used in hub topics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FrameCategory::Heartbeat => "heartbeat",
            FrameCategory::Telemetry => "telemetry",
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// The literal `"ok"` acknowledgement.
    HeartbeatAck,
    /// A `{"ModeCode":"heart_beat"}` frame sent by the device.
    Heartbeat(Value),
    /// Any other JSON payload.
    Telemetry(Value),
}

impl InboundFrame {
    /// Classify a parsed JSON value.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        if value.as_str() == Some(HEARTBEAT_ACK) {
            return InboundFrame::HeartbeatAck;
        }

        let is_heartbeat = value
            .get(MODE_CODE_KEY)
            .and_then(Value::as_str)
            .is_some_and(|mode| mode == HEARTBEAT_MODE);

        if is_heartbeat {
            InboundFrame::Heartbeat(value)
        } else {
            InboundFrame::Telemetry(value)
        }
    }

    /// Get the frame category.
    #[must_use]
    pub fn category(&self) -> FrameCategory {
        match self {
            InboundFrame::HeartbeatAck | InboundFrame::Heartbeat(_) => FrameCategory::Heartbeat,
            InboundFrame::Telemetry(_) => FrameCategory::Telemetry,
        }
    }

    /// Whether the frame only signals liveness.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.category() == FrameCategory::Heartbeat
    }

    /// Consume the frame and return its payload.
    #[must_use]
    pub fn into_payload(self) -> Value {
        match self {
            InboundFrame::HeartbeatAck => Value::String(HEARTBEAT_ACK.to_string()),
            InboundFrame::Heartbeat(v) | InboundFrame::Telemetry(v) => v,
        }
    }
}

/// Build the keepalive frame written to a printer.
#[must_use]
pub fn keepalive(timestamp_ms: u64) -> Value {
    json!({
        "ModeCode": HEARTBEAT_MODE,
        "msg": timestamp_ms.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_heartbeat_ack() {
        let frame = InboundFrame::from_value(json!("ok"));
        assert_eq!(frame, InboundFrame::HeartbeatAck);
        assert!(frame.is_heartbeat());
    }

    #[test]
    fn test_classify_heartbeat_frame() {
        let frame = InboundFrame::from_value(json!({"ModeCode": "heart_beat", "msg": "x"}));
        assert!(matches!(frame, InboundFrame::Heartbeat(_)));
        assert_eq!(frame.category(), FrameCategory::Heartbeat);
    }

    #[test]
    fn test_classify_telemetry() {
        // Other strings and other mode codes are ordinary payloads
        for value in [json!("okay"), json!({"ModeCode": "status"}), json!({"ping": 1}), json!(42)] {
            let frame = InboundFrame::from_value(value.clone());
            assert_eq!(frame.category(), FrameCategory::Telemetry);
            assert_eq!(frame.into_payload(), value);
        }
    }

    #[test]
    fn test_keepalive_shape() {
        let frame = keepalive(1_700_000_000_000);
        assert_eq!(frame["ModeCode"], "heart_beat");
        assert_eq!(frame["msg"], "1700000000000");
        assert!(InboundFrame::from_value(frame).is_heartbeat());
    }

    #[test]
    fn test_category_names() {
        assert_eq!(FrameCategory::Heartbeat.as_str(), "heartbeat");
        assert_eq!(FrameCategory::Telemetry.as_str(), "telemetry");
    }
}
