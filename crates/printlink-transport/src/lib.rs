//! # printlink-transport
//!
//! Transport abstraction layer for printer links.
//!
//! A [`Transport`] opens a [`Connection`] to an [`Endpoint`]. Connections are
//! full-duplex and message oriented: `recv` yields the next text frame,
//! `Ok(None)` on a clean close, or an error; `send` and `close` are the
//! outbound half.
//!
//! - **WebSocket** - `ws://host:port`, the printers' native link
//! - **Mock** - in-memory double for tests (feature `mock`)
//!
//! ```rust,ignore
//! use printlink_transport::{Connection, Endpoint, Transport};
//!
//! async fn dump(transport: &dyn Transport) {
//!     let mut conn = transport.open(&Endpoint::new("127.0.0.1", 9999)).await.unwrap();
//!     while let Ok(Some(text)) = conn.recv().await {
//!         println!("{text}");
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "mock")]
pub mod mock;

pub use traits::{Connection, Endpoint, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
