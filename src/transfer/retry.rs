use std::time::Duration;

use crate::config::{DEFAULT_MAX_ATTEMPTS, RuntimeConfig};

use super::TransferError;

/// Exponential backoff applied to each individual request of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.max_attempts)
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    fn attempt_limit(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next attempt when `err` (raised by attempt number
    /// `attempt`, counting from 1) may be retried.
    pub fn retry_delay(&self, attempt: u32, err: &TransferError) -> Option<Duration> {
        if err.is_transient() && attempt < self.attempt_limit() {
            Some(self.delay_for(attempt))
        } else {
            None
        }
    }

    /// Error to surface once no further attempt will be made. Transient
    /// failures are wrapped so callers can tell the budget ran out.
    pub fn give_up(&self, attempt: u32, err: TransferError) -> TransferError {
        if err.is_transient() {
            TransferError::RetriesExhausted {
                attempts: attempt,
                source: Box::new(err),
            }
        } else {
            err
        }
    }
}
