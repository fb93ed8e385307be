//! # printlink-core
//!
//! Core types and the event hub for the printlink dashboard backend.
//!
//! This crate provides the building blocks shared by every other crate:
//!
//! - **EventHub** - In-process publish/subscribe with synchronous delivery
//! - **Topic** - Naming scheme for per-device and registry topics
//! - **Event** - The value delivered to listeners
//! - **ConnectionConfig** - Persisted description of a printer endpoint
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│  EventHub   │────▶│ UI listener │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            ▲
//! ┌─────────────┐            │
//! │  Registry   │────────────┘
//! └─────────────┘
//! ```

pub mod connection;
pub mod event;
pub mod hub;
pub mod topic;

pub use connection::{ConfigError, ConnectionConfig, ConnectionDraft, ConnectionId};
pub use event::{Event, EventId};
pub use hub::{EventHub, Listener, Subscription};
pub use topic::{DeviceChannel, Topic};
