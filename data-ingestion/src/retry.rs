//! Bounded exponential retry for external calls
//!
//! After a retryable failure on attempt `n` the caller waits
//! `initial_delay * exp_base^(n - 1)` before attempt `n + 1`. Failures whose
//! status code is not in the retryable set propagate immediately.

use common::ServiceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Rejected retry settings
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryPolicyError {
    #[error("retry exp_base must be a finite number >= 1, got {0}")]
    InvalidExpBase(f64),
}

/// Retry configuration, shared process-wide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay multiplier between consecutive attempts
    #[serde(default = "default_exp_base")]
    pub exp_base: f64,

    /// Delay before the second attempt (milliseconds)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Status codes that trigger a retry
    #[serde(default = "default_retryable_status")]
    pub retryable_status: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            exp_base: default_exp_base(),
            initial_delay_ms: default_initial_delay_ms(),
            retryable_status: default_retryable_status(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_exp_base() -> f64 {
    7.0
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_retryable_status() -> Vec<u16> {
    vec![429, 500, 503, 504]
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Reject settings whose backoff would shrink, overflow or be undefined
    pub fn validate(&self) -> Result<(), RetryPolicyError> {
        if !self.exp_base.is_finite() || self.exp_base < 1.0 {
            return Err(RetryPolicyError::InvalidExpBase(self.exp_base));
        }
        Ok(())
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status.contains(&status)
    }

    pub fn is_retryable<E: Retryable>(&self, err: &E) -> bool {
        err.status_code()
            .map_or(false, |status| self.is_retryable_status(status))
    }

    /// Wait applied after attempt `attempt` (1-based) fails
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let seconds = self.initial_delay().as_secs_f64() * self.exp_base.powi(exponent);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    /// Delays before attempts 2..=max_attempts
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.delay_after_attempt(attempt))
            .collect()
    }
}

/// Errors that can be classified for retry
pub trait Retryable: Sized {
    fn status_code(&self) -> Option<u16>;

    /// Tag the last observed failure as retry-exhausted
    fn exhausted(self, attempts: u32) -> Self;
}

impl Retryable for ServiceError {
    fn status_code(&self) -> Option<u16> {
        ServiceError::status_code(self)
    }

    fn exhausted(self, attempts: u32) -> Self {
        ServiceError::RetryExhausted {
            attempts,
            last: Box::new(self),
        }
    }
}

/// Run `operation` under `policy`
///
/// Non-retryable failures are returned untouched on the attempt they occur;
/// running out of attempts returns the last failure tagged as exhausted.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(call = label, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !policy.is_retryable(&err) => {
                debug!(call = label, attempt, error = %err, "Non-retryable failure");
                return Err(err);
            }
            Err(err) if attempt >= max_attempts => {
                warn!(call = label, attempts = attempt, error = %err, "Retries exhausted");
                return Err(err.exhausted(attempt));
            }
            Err(err) => {
                let delay = policy.delay_after_attempt(attempt);
                warn!(
                    call = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn unavailable() -> ServiceError {
        ServiceError::Status {
            status: 503,
            message: "service unavailable".to_string(),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.exp_base, 7.0);
        assert!(policy.is_retryable_status(429));
        assert!(policy.is_retryable_status(504));
        assert!(!policy.is_retryable_status(404));
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 5,
            exp_base: 7.0,
            initial_delay_ms: 1_000,
            ..RetryPolicy::default()
        };
        let expected: Vec<Duration> = [1, 7, 49, 343].iter().map(|s| Duration::from_secs(*s)).collect();
        assert_eq!(policy.schedule(), expected);
        assert!(RetryPolicy::no_retry().schedule().is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_base() {
        assert!(RetryPolicy::default().validate().is_ok());
        for exp_base in [-7.0, 0.5, f64::NAN, f64::INFINITY] {
            let policy = RetryPolicy {
                exp_base,
                ..RetryPolicy::default()
            };
            assert!(matches!(policy.validate(), Err(RetryPolicyError::InvalidExpBase(_))));
        }
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy {
            exp_base: 1e9,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_after_attempt(40), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_follow_schedule() {
        let policy = RetryPolicy::default();
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let recorder = calls.clone();
        let result: Result<u32, ServiceError> = with_retry(&policy, "test", || {
            let recorder = recorder.clone();
            async move {
                let mut calls = recorder.lock().unwrap();
                calls.push(Instant::now());
                if calls.len() < 5 {
                    Err(unavailable())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        let calls = calls.lock().unwrap();
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 4);
        // Paused clock advances on millisecond ticks
        for (gap, expected) in gaps.iter().zip(policy.schedule()) {
            assert!(*gap >= expected && *gap <= expected + Duration::from_millis(1), "gap {:?} vs {:?}", gap, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_tags_last_failure() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let attempts = AtomicU32::new(0);

        let result: Result<(), ServiceError> = with_retry(&policy, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable()) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(ServiceError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(*last, unavailable());
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), ServiceError> = with_retry(&policy, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ServiceError::Status {
                    status: 404,
                    message: "not found".to_string(),
                })
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(matches!(result, Err(ServiceError::Status { status: 404, .. })));
    }
}
