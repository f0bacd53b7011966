//! Reconnection Policy
//!
//! Exponential backoff with jitter for the market data streamer's opt-in
//! reconnect. There is no built-in schedule: every parameter comes from the
//! caller, and a streamer without a [`ReconnectConfig`] never reconnects.

use std::time::Duration;

use rand::Rng;

/// Error type for reconnection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),

    /// A parameter is out of range.
    #[error("invalid reconnect configuration: {0}")]
    InvalidConfig(String),
}

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
    max_attempts: u32,
}

impl ReconnectConfig {
    /// Create a configuration with no jitter and unlimited attempts.
    ///
    /// # Errors
    ///
    /// Returns an error if `initial_delay` is zero, `max_delay` is below
    /// `initial_delay`, or `multiplier` is not a finite value of at least 1.
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Result<Self, ReconnectError> {
        if initial_delay.is_zero() {
            return Err(ReconnectError::InvalidConfig(
                "initial delay must be positive".to_string(),
            ));
        }
        if max_delay < initial_delay {
            return Err(ReconnectError::InvalidConfig(format!(
                "max delay {max_delay:?} is below initial delay {initial_delay:?}"
            )));
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ReconnectError::InvalidConfig(format!(
                "multiplier {multiplier} must be finite and >= 1"
            )));
        }

        Ok(Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor: 0.0,
            max_attempts: 0,
        })
    }

    /// Randomize each delay by up to `±factor` of its value.
    ///
    /// # Errors
    ///
    /// Returns an error unless `factor` is within `0.0..=1.0`.
    pub fn with_jitter(mut self, factor: f64) -> Result<Self, ReconnectError> {
        if !(0.0..=1.0).contains(&factor) {
            return Err(ReconnectError::InvalidConfig(format!(
                "jitter factor {factor} must be within 0..=1"
            )));
        }
        self.jitter_factor = factor;
        Ok(self)
    }

    /// Cap the number of consecutive attempts (0 = unlimited).
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the first attempt.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound on any delay before jitter.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Consecutive attempt cap (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Backoff state across consecutive failures.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tasty_stream::infrastructure::tastytrade::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let config = ReconnectConfig::new(Duration::from_millis(500), Duration::from_secs(30), 2.0)
///     .unwrap()
///     .with_max_attempts(5);
/// let mut policy = ReconnectPolicy::new(config);
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
///
/// // After a successful handshake
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy at its initial delay.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay);
        self.current_delay = self
            .current_delay
            .mul_f64(self.config.multiplier)
            .min(self.config.max_delay);

        Some(delay)
    }

    /// Back to the initial delay after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Check whether the policy gave up.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectError::MaxAttemptsExceeded`] once attempts are
    /// exhausted.
    pub const fn ensure_retry(&self) -> Result<(), ReconnectError> {
        if self.should_retry() {
            Ok(())
        } else {
            Err(ReconnectError::MaxAttemptsExceeded(self.config.max_attempts))
        }
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        let spread = self.config.jitter_factor;
        let scale = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        delay.mul_f64(scale).max(Duration::from_millis(1))
    }
}
