//! Mapping of retry policies onto the engine's native retry options

use std::time::Duration;

use crate::reliability::RetryPolicy;

/// Retry options in the shape durable engines accept
///
/// Engines apply their own backoff, so [`RetryPolicy::jitter`] has no
/// counterpart here.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRetryPolicy {
    /// 0 means unlimited
    pub maximum_attempts: i32,
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    pub non_retryable_error_types: Vec<String>,
}

/// Convert a retry policy for the engine
///
/// `None` stays `None` so the engine applies its own default; it never means
/// "no retries". Every other policy, including an all-zero one, maps field by
/// field.
pub fn to_native_retry_policy(policy: Option<&RetryPolicy>) -> Option<NativeRetryPolicy> {
    policy.map(|policy| NativeRetryPolicy {
        maximum_attempts: i32::try_from(policy.max_attempts).unwrap_or(i32::MAX),
        initial_interval: policy.initial_interval,
        backoff_coefficient: policy.backoff_coefficient,
        maximum_interval: policy.max_interval,
        non_retryable_error_types: policy.non_retryable_errors.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_policy_stays_absent() {
        assert_eq!(to_native_retry_policy(None), None);
    }

    #[test]
    fn test_zero_policy_is_not_absent() {
        let zero = RetryPolicy {
            max_attempts: 0,
            initial_interval: Duration::ZERO,
            backoff_coefficient: 0.0,
            max_interval: Duration::ZERO,
            jitter: 0.0,
            non_retryable_errors: Vec::new(),
        };

        assert_eq!(
            to_native_retry_policy(Some(&zero)),
            Some(NativeRetryPolicy {
                maximum_attempts: 0,
                initial_interval: Duration::ZERO,
                backoff_coefficient: 0.0,
                maximum_interval: Duration::ZERO,
                non_retryable_error_types: Vec::new(),
            })
        );
    }

    #[test]
    fn test_fields_map_one_to_one() {
        let policy = RetryPolicy::exponential()
            .with_max_attempts(3)
            .with_initial_interval(Duration::from_millis(250))
            .with_backoff_coefficient(1.5)
            .with_max_interval(Duration::from_secs(5))
            .with_non_retryable_error("VALIDATION");

        let native = to_native_retry_policy(Some(&policy)).unwrap();
        assert_eq!(native.maximum_attempts, 3);
        assert_eq!(native.initial_interval, Duration::from_millis(250));
        assert_eq!(native.backoff_coefficient, 1.5);
        assert_eq!(native.maximum_interval, Duration::from_secs(5));
        assert_eq!(native.non_retryable_error_types, vec!["VALIDATION"]);
    }

    #[test]
    fn test_max_attempts_saturates() {
        let policy = RetryPolicy::exponential().with_max_attempts(u32::MAX);
        let native = to_native_retry_policy(Some(&policy)).unwrap();
        assert_eq!(native.maximum_attempts, i32::MAX);
    }
}
