//! Codec for printer link frames.
//!
//! Frames are single JSON documents carried in WebSocket text messages.
//! The bare text `ok` (unquoted) is accepted as a heartbeat acknowledgement
//! alongside its JSON-quoted form.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::frames::{InboundFrame, HEARTBEAT_ACK};

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame is empty.
    #[error("Empty frame")]
    Empty,

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode an outbound payload to frame text.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(payload).map_err(ProtocolError::Encode)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode and classify an inbound frame.
///
/// # Errors
///
/// Returns an error if the text is empty, too large, or not valid JSON.
pub fn decode(text: &str) -> Result<InboundFrame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if trimmed == HEARTBEAT_ACK {
        return Ok(InboundFrame::HeartbeatAck);
    }

    let value: Value = serde_json::from_str(trimmed).map_err(ProtocolError::Decode)?;
    Ok(InboundFrame::from_value(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_bare_ok() {
        assert_eq!(decode("ok").unwrap(), InboundFrame::HeartbeatAck);
        assert_eq!(decode("\"ok\"").unwrap(), InboundFrame::HeartbeatAck);
        assert_eq!(decode(" ok\n").unwrap(), InboundFrame::HeartbeatAck);
    }

    #[test]
    fn test_decode_telemetry() {
        let frame = decode(r#"{"ping":1}"#).unwrap();
        assert_eq!(frame, InboundFrame::Telemetry(json!({"ping": 1})));
    }

    #[test]
    fn test_decode_malformed() {
        match decode("{not json") {
            Err(ProtocolError::Decode(_)) => {}
            other => panic!("Expected Decode error, got {:?}", other),
        }
        assert!(matches!(decode("   "), Err(ProtocolError::Empty)));
    }

    #[test]
    fn test_frame_too_large() {
        let large = "x".repeat(MAX_FRAME_SIZE + 1);
        assert!(matches!(decode(&large), Err(ProtocolError::FrameTooLarge(_))));

        let payload = json!({ "blob": large });
        assert!(matches!(encode(&payload), Err(ProtocolError::FrameTooLarge(_))));
    }

    #[test]
    fn test_encode_echoes_back_as_same_payload() {
        let payload = json!({"cmd": "set", "params": {"fan": 80}});
        let text = encode(&payload).unwrap();
        assert_eq!(decode(&text).unwrap().into_payload(), payload);
    }
}
