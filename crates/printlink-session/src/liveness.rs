//! Heartbeat liveness tracking.
//!
//! Any inbound traffic counts as a heartbeat. The tracker uses tokio's clock
//! so paused-time tests can drive it.

use std::time::Duration;
use tokio::time::Instant;

/// Tracks the last liveness signal of a session.
#[derive(Debug, Clone)]
pub struct Liveness {
    last_seen: Instant,
    timeout: Duration,
}

impl Liveness {
    /// Start tracking, counting now as the last signal.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_seen: Instant::now(),
            timeout,
        }
    }

    /// Record a liveness signal.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Instant of the last signal.
    #[must_use]
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Time since the last signal.
    #[must_use]
    pub fn silent_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_seen)
    }

    /// Whether the silence has reached the timeout.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.silent_for() >= self.timeout
    }

    /// Configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
