//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::AcceptBackoffConfig;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Tracks consecutive accept failures and decides how long to pause.
///
/// Once `max_consecutive_failures` is exceeded the failures are considered
/// persistent and [`next_delay`](AcceptBackoff::next_delay) returns `None`.
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    config: AcceptBackoffConfig,
    failures: u32,
}

impl AcceptBackoff {
    pub fn new(config: AcceptBackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Record a failure and return the pause before the next accept,
    /// or `None` when the loop should give up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        let limit = self.config.max_consecutive_failures;
        if limit != 0 && self.failures > limit {
            return None;
        }
        Some(calculate_backoff(
            self.failures,
            self.config.base_delay_ms,
            self.config.max_delay_ms,
        ))
    }

    /// Clear the failure streak after a successful accept.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
