//! Retry utilities with exponential backoff, cap, and jitter.
//!
//! Drives saga step and compensation retries (spec.md §4.6.2d,
//! §4.6.3) for transient adapter failures.

use std::time::Duration;

use rand::Rng;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base delay for first retry (before jitter).
    pub base_delay: Duration,
    /// Maximum delay cap (before jitter).
    pub max_delay: Duration,
    /// Maximum number of retry attempts (0 = no retries, just initial attempt).
    pub max_retries: u32,
    /// Jitter factor: delay is multiplied by random value in [1-jitter, 1+jitter].
    /// Set to 0.0 for no jitter.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(2),
            max_retries: 10,
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    /// Retry config for saga forward steps (spec.md §6.4's
    /// `saga.step_max_attempts`/`saga.backoff_*` family).
    pub fn for_saga_steps() -> Self {
        Self::default()
    }

    /// Compensations get one extra attempt before orphaning, since
    /// leaving a saga `Orphaned` is a worse outcome than a slower
    /// compensation (spec.md §4.6.3).
    pub fn for_saga_compensation() -> Self {
        Self {
            max_retries: 12,
            ..Self::default()
        }
    }

    /// Delay for a given attempt number (0-indexed): `base * 2^attempt`,
    /// capped at `max_delay`, with multiplicative jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped_ms = exponential_ms.min(self.max_delay.as_millis() as u64);

        let jittered_ms = if self.jitter > 0.0 {
            let jitter_pct = rand::rng().random_range(-1.0..=1.0);
            let jitter_factor = 1.0 + (jitter_pct * self.jitter);
            (capped_ms as f64 * jitter_factor) as u64
        } else {
            capped_ms
        };

        Duration::from_millis(jittered_ms)
    }

    /// Whether another retry attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
