// Retry strategy - maps a retry number to the delay before redelivery
use crate::error::ConfigurationError;
use std::time::Duration;

/// Longest delay a queue accepts for a visibility change (12 hours)
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(12 * 60 * 60);

/// Default exponential base (seconds per power)
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;

/// Backoff strategy
///
/// Must be pure: it is evaluated on every failed attempt, from many
/// workers at once, without locking.
pub trait RetryStrategy: Send + Sync {
    /// Delay before the message becomes visible again; `retry_number` is 0
    /// on the first failure
    fn delay(&self, retry_number: u32) -> Duration;
}

/// `delay(n) = base^n` seconds, capped at [`MAX_RETRY_DELAY`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    base: f64,
}

impl ExponentialBackoff {
    /// # Errors
    /// `InvalidOption` unless `base` is finite and at least 1
    pub fn new(base: f64) -> Result<Self, ConfigurationError> {
        if !base.is_finite() || base < 1.0 {
            return Err(ConfigurationError::invalid_option(
                "RetryBackoffBase",
                format!("must be a finite number >= 1, got {base}"),
            ));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> f64 {
        self.base
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn delay(&self, retry_number: u32) -> Duration {
        let exponent = i32::try_from(retry_number).unwrap_or(i32::MAX);
        let seconds = self.base.powi(exponent);
        if !seconds.is_finite() || seconds >= MAX_RETRY_DELAY.as_secs_f64() {
            return MAX_RETRY_DELAY;
        }
        Duration::from_secs_f64(seconds)
    }
}

/// Same delay for every retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl RetryStrategy for FixedDelay {
    fn delay(&self, _retry_number: u32) -> Duration {
        self.0
    }
}

impl<F> RetryStrategy for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, retry_number: u32) -> Duration {
        self(retry_number)
    }
}
