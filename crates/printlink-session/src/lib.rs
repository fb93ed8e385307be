//! # printlink-session
//!
//! Connection and liveness subsystem for printlink.
//!
//! - **Session** - Per-device state machine that owns one transport
//!   connection, watches its heartbeat and republishes frames on the hub
//! - **Registry** - Owns the connection configs and at most one live session
//!   per connection
//! - **ConfigStore** - Durable list of connection configs
//! - **Backoff** - Reconnect delay policy layered over `Registry::connect`
//!
//! ```text
//!                   connect/send/close
//! ┌─────────────┐ ───────────────────▶ ┌─────────────┐    ┌─────────────┐
//! │  Registry   │                      │   Session   │───▶│  Transport  │
//! └─────────────┘ ◀─── state (watch) ─ └─────────────┘    └─────────────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌─────────────┐                      ┌─────────────┐
//! │ ConfigStore │                      │  EventHub   │
//! └─────────────┘                      └─────────────┘
//! ```

pub mod backoff;
pub mod error;
pub mod liveness;
pub mod registry;
pub mod session;
pub mod store;

pub use backoff::Backoff;
pub use error::{RegistryError, SessionError, StoreError};
pub use liveness::Liveness;
pub use registry::{ConnectionSummary, Registry};
pub use session::{Session, SessionConfig, SessionState};
pub use store::{ConfigStore, JsonFileStore, MemoryStore, StoredConnections};
