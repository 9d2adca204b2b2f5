//! Failure classification and exponential backoff for chunk transfers.
//!
//! A failed collaborator call is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - the transport failed; the same request may succeed
//! - [`FailureType::TokenExpired`] - the access token was rejected; refresh and resend
//! - [`FailureType::UrlExpired`] - a signed URL was rejected with 403; renew and resend
//! - [`FailureType::Permanent`] - any other rejection; fail the transfer
//!
//! Token and URL expiry are recovered by the signed-URL session with their own
//! budgets. [`RetryPolicy`] only paces transport retries.
//!
//! # Example
//!
//! ```
//! use oss_transfer::api::{Service, ServiceError};
//! use oss_transfer::transfer::{classify_error, FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::with_max_attempts(3);
//! let error = ServiceError::status(Service::SignedUrl, 500, "internal error");
//! assert_eq!(classify_error(&error), FailureType::Permanent);
//!
//! match policy.should_retry(FailureType::Transient, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::api::{Service, ServiceError};
use crate::config::DEFAULT_MAX_CHUNK_TRANSPORT_ATTEMPTS;

/// HTTP status a signed URL answers with once it has expired.
pub const URL_EXPIRED_STATUS: u16 = 403;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of collaborator failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Connection reset, timeout, or any other transport failure.
    Transient,

    /// Rejected by the remote side for a reason a resend will not fix.
    Permanent,

    /// The access token was rejected as invalid or expired.
    TokenExpired,

    /// A signed URL answered 403.
    UrlExpired,
}

/// Decision on whether to retry a failed chunk transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for transport retries with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `base_delay`: 1 second
/// - `max_delay`: 32 seconds
/// - `backoff_multiplier`: 2.0
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_CHUNK_TRANSPORT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (must be >= 1)
    /// * `base_delay` - Base delay for first retry
    /// * `max_delay` - Maximum delay cap
    /// * `backoff_multiplier` - Multiplier for exponential increase
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry a failed chunk transfer.
    ///
    /// `attempt` is the attempt number that just failed (1-indexed).
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::TokenExpired | FailureType::UrlExpired => {
                return RetryDecision::DoNotRetry {
                    reason: "credential expiry - renewed by the session, not by backoff"
                        .to_string(),
                };
            }
            FailureType::Transient => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay for a retry attempt with exponential backoff and jitter.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 = multiplier^0 = 1x base
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + Self::calculate_jitter()
    }

    /// Generates random jitter between 0 and `MAX_JITTER`.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter() -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a collaborator error for recovery decisions.
///
/// | Error | Type |
/// |-------|------|
/// | `Status` 403 from a signed URL | `UrlExpired` |
/// | other `Status` from a signed URL | `Permanent` |
/// | API `Status` whose body names an invalid or expired token | `TokenExpired` |
/// | any other `Status` | `Permanent` |
/// | `Transport` | `Transient` |
/// | `InvalidRequest`, `InvalidResponse` | `Permanent` |
#[must_use]
pub fn classify_error(error: &ServiceError) -> FailureType {
    match error {
        // Signed-URL responses never signal access-token expiry.
        ServiceError::Status {
            service: Service::SignedUrl,
            status,
            ..
        } => classify_status(Service::SignedUrl, *status),
        ServiceError::Status { service, status, .. } => {
            if error.is_token_expired() {
                FailureType::TokenExpired
            } else {
                classify_status(*service, *status)
            }
        }
        ServiceError::Transport { .. } => FailureType::Transient,
        ServiceError::InvalidRequest { .. } | ServiceError::InvalidResponse { .. } => {
            FailureType::Permanent
        }
    }
}

/// Classifies a non-success HTTP status from the given service.
#[must_use]
pub fn classify_status(service: Service, status: u16) -> FailureType {
    match (service, status) {
        (Service::SignedUrl, URL_EXPIRED_STATUS) => FailureType::UrlExpired,
        _ => FailureType::Permanent,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
        assert!((policy.backoff_multiplier - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::with_max_attempts(0);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_retry_policy_custom() {
        let policy = RetryPolicy::new(7, Duration::from_millis(500), Duration::from_secs(60), 3.0);
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_delay_calculation_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(32), 2.0);
        let first = policy.calculate_delay(1);
        assert!(first >= Duration::from_secs(1));
        assert!(first <= Duration::from_millis(1500));

        let third = policy.calculate_delay(3);
        assert!(third >= Duration::from_secs(4));
        assert!(third <= Duration::from_millis(4500));
    }

    #[test]
    fn test_delay_calculation_respects_max_delay() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0);
        let delay = policy.calculate_delay(6);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(5500));
    }

    #[test]
    fn test_jitter_within_bounds() {
        for _ in 0..100 {
            let jitter = RetryPolicy::calculate_jitter();
            assert!(
                jitter <= MAX_JITTER,
                "Jitter {} exceeds max",
                jitter.as_millis()
            );
        }
    }

    // ==================== Error Classification Tests ====================

    #[test]
    fn test_classify_transport_transient() {
        let error = ServiceError::transport(Service::SignedUrl, std::io::Error::other("reset"));
        assert_eq!(classify_error(&error), FailureType::Transient);
    }

    #[test]
    fn test_classify_signed_url_403_url_expired() {
        let error =
            ServiceError::status(Service::SignedUrl, 403, "<Error>Request has expired</Error>");
        assert_eq!(classify_error(&error), FailureType::UrlExpired);
    }

    #[test]
    fn test_classify_signed_url_403_with_token_wording_url_expired() {
        let error = ServiceError::status(Service::SignedUrl, 403, "Signature invalid or expired");
        assert_eq!(classify_error(&error), FailureType::UrlExpired);
    }

    #[test]
    fn test_classify_api_403_permanent() {
        let error = ServiceError::status(Service::ObjectStorage, 403, "forbidden");
        assert_eq!(classify_error(&error), FailureType::Permanent);
    }

    #[test]
    fn test_classify_token_expiry_message() {
        let error = ServiceError::status(
            Service::ObjectStorage,
            401,
            r#"{"developerMessage":"The token is Invalid or Expired."}"#,
        );
        assert_eq!(classify_error(&error), FailureType::TokenExpired);
    }

    #[test]
    fn test_classify_server_error_permanent() {
        let error = ServiceError::status(Service::SignedUrl, 503, "slow down");
        assert_eq!(classify_error(&error), FailureType::Permanent);
    }

    #[test]
    fn test_classify_invalid_response_permanent() {
        let error = ServiceError::invalid_response(Service::ObjectStorage, "bad json");
        assert_eq!(classify_error(&error), FailureType::Permanent);
    }

    // ==================== Should Retry Decision Tests ====================

    #[test]
    fn test_should_retry_permanent_does_not_retry() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Permanent, 1);
        if let RetryDecision::DoNotRetry { reason } = decision {
            assert!(reason.contains("permanent"));
        } else {
            panic!("Expected DoNotRetry, got {decision:?}");
        }
    }

    #[test]
    fn test_should_retry_expiry_left_to_session() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.should_retry(FailureType::UrlExpired, 1),
            RetryDecision::DoNotRetry { .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::TokenExpired, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::with_max_attempts(3);

        let decision = policy.should_retry(FailureType::Transient, 1);
        assert!(matches!(decision, RetryDecision::Retry { attempt: 2, .. }));

        let decision = policy.should_retry(FailureType::Transient, 2);
        assert!(matches!(decision, RetryDecision::Retry { attempt: 3, .. }));

        let decision = policy.should_retry(FailureType::Transient, 3);
        if let RetryDecision::DoNotRetry { reason } = decision {
            assert!(reason.contains("exhausted"));
        } else {
            panic!("Expected DoNotRetry, got {decision:?}");
        }
    }
}
