//! Exponential backoff with full jitter for reconnection delays
//!
//! `delay = random(0, min(cap, base * 2^attempt))`

use rand::Rng;
use std::time::Duration;

/// Exponential backoff calculator with full jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    /// Current attempt number (0-indexed)
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    /// Upper bound of the next delay, before jitter
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        let exp = self
            .base_ms
            .saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        Duration::from_millis(exp.min(self.max_ms))
    }

    /// Compute the next delay with full jitter and advance the attempt
    pub fn next_delay(&mut self) -> Duration {
        let capped = u64::try_from(self.ceiling().as_millis()).unwrap_or(u64::MAX);
        let jittered = if capped == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=capped)
        };
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(jittered)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
