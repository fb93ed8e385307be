//! Reconnect delay policy.

use std::time::Duration;

/// Doubling backoff between reconnect attempts.
///
/// The `n`th retry waits `base * 2^min(n, max_exponent)`, capped at
/// `max_delay`. With the defaults that is 2s, 4s, 8s, ... up to 60s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// Unit delay.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Largest exponent applied to `base`.
    pub max_exponent: u32,
    /// Total connect attempts allowed, `None` for no limit.
    pub max_attempts: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_exponent: 6,
            max_attempts: None,
        }
    }
}

impl Backoff {
    /// Limit the number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.min(self.max_exponent);
        let factor = 2u32.saturating_pow(exponent);
        self.base.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether attempt number `attempt` (1-based) may be made.
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}
