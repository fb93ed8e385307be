//! # printlink-protocol
//!
//! Frame definitions and codec for the printer telemetry link.
//!
//! Printers speak JSON over a text WebSocket. The protocol layer does not
//! interpret device payloads; it only decides which category a frame belongs
//! to so the session layer can route it:
//!
//! - `"ok"` - heartbeat acknowledgement
//! - `{"ModeCode":"heart_beat", ...}` - device heartbeat frame
//! - any other JSON value - telemetry
//!
//! ## Example
//!
//! ```rust
//! use printlink_protocol::{codec, InboundFrame};
//!
//! let frame = codec::decode(r#"{"nozzleTemp": 210.5}"#).unwrap();
//! assert!(matches!(frame, InboundFrame::Telemetry(_)));
//!
//! let ack = codec::decode("ok").unwrap();
//! assert!(ack.is_heartbeat());
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError, MAX_FRAME_SIZE};
pub use frames::{FrameCategory, InboundFrame};
