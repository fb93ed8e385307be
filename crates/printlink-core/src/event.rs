//! Events delivered by the hub.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique event identifier.
pub type EventId = u64;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique event ID.
#[must_use]
pub fn generate_event_id() -> EventId {
    let timestamp = now_nanos();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// A published value together with its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// Topic the event was published on.
    pub topic: String,
    /// Event payload.
    pub payload: Value,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            id: generate_event_id(),
            topic: topic.into(),
            payload,
            timestamp: unix_millis(),
        }
    }
}
