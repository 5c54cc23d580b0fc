//! Reconnect backoff for the registration connection.
//!
//! Each consecutive failure multiplies the delay by `coefficient + U(0, jitter)`
//! (default `1.5 + U(0, 0.1)`). The delay is uncapped unless
//! [`BackoffConfig::max_delay`] is set, and it returns to
//! [`BackoffConfig::initial_delay`] after a successful connection.

use std::time::Duration;
use thiserror::Error;

/// Invalid backoff configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackoffError {
    /// Initial delay must be non-zero, otherwise the delay never grows.
    #[error("initial delay must be greater than zero")]
    ZeroInitialDelay,

    /// The growth coefficient must be greater than one.
    #[error("backoff coefficient must be greater than 1 (got {0})")]
    CoefficientTooSmall(f64),

    /// Jitter must be a finite, non-negative fraction.
    #[error("jitter must be finite and non-negative (got {0})")]
    InvalidJitter(f64),

    /// A cap below the initial delay would make the first delay exceed it.
    #[error("max delay {max:?} is below initial delay {initial:?}")]
    CapBelowInitial {
        /// Configured cap.
        max: Duration,
        /// Configured initial delay.
        initial: Duration,
    },
}

/// Parameters of the reconnect delay sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Base multiplier applied after every failure (must be > 1).
    pub coefficient: f64,
    /// Upper bound of the uniform random term added to the multiplier.
    pub jitter: f64,
    /// Optional ceiling for the delay. `None` means uncapped.
    pub max_delay: Option<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            coefficient: 1.5,
            jitter: 0.1,
            max_delay: None,
        }
    }
}

impl BackoffConfig {
    /// Check the configuration for values that would break the delay sequence.
    pub fn validate(&self) -> Result<(), BackoffError> {
        if self.initial_delay.is_zero() {
            return Err(BackoffError::ZeroInitialDelay);
        }
        if !(self.coefficient.is_finite() && self.coefficient > 1.0) {
            return Err(BackoffError::CoefficientTooSmall(self.coefficient));
        }
        if !(self.jitter.is_finite() && self.jitter >= 0.0) {
            return Err(BackoffError::InvalidJitter(self.jitter));
        }
        if let Some(max) = self.max_delay {
            if max < self.initial_delay {
                return Err(BackoffError::CapBelowInitial {
                    max,
                    initial: self.initial_delay,
                });
            }
        }
        Ok(())
    }

    /// Set the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Cap the delay.
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }
}

/// Current position in the reconnect delay sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    /// Create a backoff sequence, validating the configuration.
    pub fn new(config: BackoffConfig) -> Result<Self, BackoffError> {
        config.validate()?;
        let current = config.initial_delay;
        Ok(Self { config, current })
    }

    /// The delay that the next failure will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the delay for this failure and grow it for the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let factor = self.config.coefficient + self.config.jitter * random_unit();
        // Saturate instead of overflowing after very long failure streaks
        let grown = Duration::try_from_secs_f64(self.current.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);
        self.current = match self.config.max_delay {
            Some(max) => grown.min(max),
            None => grown,
        };
        delay
    }

    /// Return to the initial delay (after a successful connection).
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
    }

    /// The configuration this sequence was built from.
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

/// Uniform random value in `[0, 1)`. Falls back to 0 (no jitter) if the OS
/// random source is unavailable.
fn random_unit() -> f64 {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0.0;
    }
    let random = u64::from_le_bytes(bytes) >> 11; // 53 bits of mantissa
    random as f64 / (1u64 << 53) as f64
}
