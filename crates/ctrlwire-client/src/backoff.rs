use std::time::Duration;

/// Reconnect delay policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive attempts.
    pub multiplier: u32,
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_retries: Some(10),
        }
    }
}

/// Exponential backoff with a cap and an optional retry budget.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay for the given 1-based attempt: `initial * multiplier^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.config.multiplier.max(1).saturating_pow(exponent);
        self.config
            .initial_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Advance to the next attempt and return its delay, or `None` once the
    /// retry budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_retries {
            if self.attempt >= max {
                return None;
            }
        }
        self.attempt = self.attempt.saturating_add(1);
        Some(self.delay_for(self.attempt))
    }

    /// Attempts made since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start a fresh attempt sequence.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}
