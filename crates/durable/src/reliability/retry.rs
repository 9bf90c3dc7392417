//! Retry policy implementation

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activity::ActivityError;

/// Backend-neutral description of activity retries
///
/// Supports exponential backoff with jitter to avoid thundering herd. Each
/// backend maps the policy onto its own retry mechanism: the in-memory backend
/// drives the loop itself, durable engines receive a
/// [`NativeRetryPolicy`](crate::backend::durable::NativeRetryPolicy).
///
/// An activity bound to no policy at all (`Option::None`) uses the backend
/// default; that is different from a policy with `max_attempts == 1`.
///
/// # Example
///
/// ```
/// use weft_durable::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_initial_interval(Duration::from_secs(1))
///     .with_max_interval(Duration::from_secs(60));
///
/// // First retry after ~1 second
/// // Second retry after ~2 seconds
/// // Third retry after ~4 seconds
/// assert!(policy.has_attempts_remaining(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one); 0 means unlimited
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Multiplier applied to the delay after every retry
    pub backoff_coefficient: f64,

    /// Upper bound for the delay between attempts; zero disables the cap
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Jitter factor (0.0-1.0); 0.1 means ±10% randomness
    #[serde(default)]
    pub jitter: f64,

    /// Error types (see [`ActivityError::error_type`]) that fail immediately
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff with sensible defaults
    ///
    /// - 5 max attempts
    /// - 1 second initial interval
    /// - 60 second max interval
    /// - 2x backoff coefficient
    /// - 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(60),
            jitter: 0.1,
            non_retryable_errors: vec![],
        }
    }

    /// A single attempt, never retried
    pub fn no_retry() -> Self {
        Self::fixed(Duration::ZERO, 1)
    }

    /// Fixed interval between attempts, no backoff and no jitter
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            backoff_coefficient: 1.0,
            max_interval: interval,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the jitter factor, clamped to 0.0-1.0
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_non_retryable_error(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_errors.push(error_type.into());
        self
    }

    /// Delay to wait before the given attempt (1-based)
    ///
    /// The first attempt never waits; attempt `n` waits
    /// `initial_interval * backoff_coefficient^(n-2)`, capped by `max_interval`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(2).min(i32::MAX as u32) as i32;
        let mut delay =
            self.initial_interval.as_secs_f64() * self.backoff_coefficient.max(1.0).powi(exponent);
        if !self.max_interval.is_zero() {
            delay = delay.min(self.max_interval.as_secs_f64());
        }

        if self.jitter > 0.0 && delay > 0.0 {
            let spread = delay * self.jitter;
            delay = (delay + rand::thread_rng().gen_range(-spread..=spread)).max(0.0);
        }

        Duration::from_secs_f64(delay)
    }

    /// Whether another attempt may follow the given (1-based) attempt
    pub fn has_attempts_remaining(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }

    /// Whether the error allows another attempt under this policy
    pub fn should_retry(&self, error: &ActivityError) -> bool {
        if !error.retryable {
            return false;
        }
        match &error.error_type {
            Some(error_type) => !self.non_retryable_errors.iter().any(|e| e == error_type),
            None => true,
        }
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
