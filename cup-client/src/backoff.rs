//! Reconnection backoff policy
//!
//! Decides if and when a broken connection is retried. The schedule is
//! plain exponential doubling from a base delay, clamped to an upper
//! bound, with a hard attempt cap after which the channel stays down
//! until the caller connects again explicitly.

use std::time::Duration;

use crate::config::RealtimeConfig;

/// Capped exponential backoff schedule
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(
            config.reconnect_delay,
            config.max_reconnect_delay,
            config.max_reconnect_attempts,
        )
    }

    /// Whether another retry may be scheduled after `attempts_so_far`
    /// consecutive failures
    pub fn allows(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based)
    ///
    /// `base * 2^(attempt-1)`, clamped to the configured maximum.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Shift capped at 2^20: anything beyond is clamped anyway.
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
