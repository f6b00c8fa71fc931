//! Bounded retry with exponential backoff.
//!
//! The backoff sleep is the only suspension point and always races the
//! caller's [`CancellationToken`], so a retry loop never outlives the
//! request that started it.
//!
//! # Retryable Errors
//!
//! | Retryable | Non-Retryable |
//! |-----------|---------------|
//! | Transient validator failure | Permanent validator failure |
//! | Call timeout | Circuit open |
//!
//! # Example
//!
//! ```rust,ignore
//! use admission_engine::resilience::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.delay_before(2), Duration::from_millis(100));
//! assert_eq!(policy.delay_before(3), Duration::from_millis(200));
//!
//! let verdict = policy
//!     .run("primary", &token, |_attempt| validator.validate(&request))
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::circuit_breaker::CircuitError;
use crate::observability::record_retry;

/// Error categories for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient failure; try again after backoff.
    Retryable,
    /// Permanent failure; stop immediately.
    NonRetryable,
}

/// Errors that know whether retrying them can help.
pub trait Retryable {
    /// Retry category of this error.
    fn category(&self) -> ErrorCategory;
}

impl<E: Retryable> Retryable for CircuitError<E> {
    fn category(&self) -> ErrorCategory {
        match self {
            // Retrying an open circuit inside one request only burns the budget.
            Self::Open { .. } => ErrorCategory::NonRetryable,
            Self::Timeout { .. } => ErrorCategory::Retryable,
            Self::Inner(e) => e.category(),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Backoff unit.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Jitter fraction (0.0 = deterministic, 0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; `source` is the last error, unchanged.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Last error.
        source: E,
    },

    /// A non-retryable error stopped the loop early.
    NonRetryable {
        /// Attempts made.
        attempts: u32,
        /// The error.
        source: E,
    },

    /// The caller's token fired during backoff.
    Cancelled {
        /// Attempts made before cancellation.
        attempts: u32,
        /// Error of the last attempt, if one ran.
        last: Option<E>,
    },
}

impl<E> RetryError<E> {
    /// Attempts made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Last error seen, if any.
    #[must_use]
    pub const fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => Some(source),
            Self::Cancelled { last, .. } => last.as_ref(),
        }
    }

    /// Whether the loop ended because of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts, source } => {
                write!(f, "gave up after {attempts} attempts: {source}")
            }
            Self::NonRetryable { attempts, source } => {
                write!(f, "non-retryable error on attempt {attempts}: {source}")
            }
            Self::Cancelled {
                attempts,
                last: Some(last),
            } => write!(f, "cancelled after {attempts} attempts (last error: {last})"),
            Self::Cancelled {
                attempts,
                last: None,
            } => write!(f, "cancelled after {attempts} attempts"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl RetryPolicy {
    /// Create a new retry policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Delay before attempt `attempt` (1-based), before jitter:
    /// `min(max_delay, base_delay * multiplier^(attempt - 1))`. Zero for the
    /// first attempt.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let scaled_nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let max_nanos = self.max_delay.as_nanos() as f64;
        if !scaled_nanos.is_finite() || scaled_nanos >= max_nanos {
            return self.max_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = scaled_nanos.max(0.0) as u64;
        Duration::from_nanos(nanos)
    }

    /// Apply jitter: uniform in `[d * (1 - j), d * (1 + j)]`, capped at
    /// `max_delay`.
    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let secs = delay.as_secs_f64();
        let range = secs * self.jitter_factor;
        let jittered = rand::rng().random_range((secs - range).max(0.0)..=secs + range);
        Duration::from_secs_f64(jittered).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts
    /// or `cancel` fires. `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// See [`RetryError`].
    pub async fn run<F, Fut, T, E>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);

        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts: 0,
                last: None,
            });
        }

        let mut attempt = 1;
        loop {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if error.category() == ErrorCategory::NonRetryable {
                tracing::debug!(operation, attempt, error = %error, "Non-retryable error");
                return Err(RetryError::NonRetryable {
                    attempts: attempt,
                    source: error,
                });
            }

            if attempt >= max_attempts {
                tracing::warn!(operation, attempts = attempt, error = %error, "Retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.apply_jitter(self.delay_before(attempt + 1));
            record_retry(operation, attempt + 1);
            tracing::debug!(
                operation,
                attempt,
                delay_ms = delay.as_millis(),
                error = %error,
                "Retrying after backoff"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!(operation, attempts = attempt, "Retry cancelled");
                    return Err(RetryError::Cancelled {
                        attempts: attempt,
                        last: Some(error),
                    });
                }
                () = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Transient(u32),
        Permanent,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl std::error::Error for TestError {}

    impl Retryable for TestError {
        fn category(&self) -> ErrorCategory {
            match self {
                Self::Transient(_) => ErrorCategory::Retryable,
                Self::Permanent => ErrorCategory::NonRetryable,
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy::new(5, Duration::from_millis(50), Duration::from_secs(10));
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert!(policy.delay_before(3) > policy.delay_before(2));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(20, Duration::from_millis(50), Duration::from_millis(300));
        assert_eq!(policy.delay_before(4), Duration::from_millis(300));
        assert_eq!(policy.delay_before(60), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter_factor: 0.2,
            ..RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(10))
        };
        for _ in 0..100 {
            let d = policy.apply_jitter(Duration::from_millis(100));
            assert!(d >= Duration::from_millis(79) && d <= Duration::from_millis(121));
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("test", &CancellationToken::new(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(TestError::Transient(attempt))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let result: Result<(), _> = fast_policy(3)
            .run("test", &CancellationToken::new(), |attempt| async move {
                Err(TestError::Transient(attempt))
            })
            .await;
        match result.unwrap_err() {
            RetryError::Exhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source, TestError::Transient(3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("test", &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Permanent) }
            })
            .await;
        assert!(matches!(
            result,
            Err(RetryError::NonRetryable { attempts: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff_stops_loop() {
        let policy = RetryPolicy::new(10, Duration::from_secs(30), Duration::from_secs(60));
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> = policy
            .run("test", &token, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(TestError::Transient(attempt)) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.attempts(), 1);
        assert_eq!(err.last_error(), Some(&TestError::Transient(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_runs_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), RetryError<TestError>> = fast_policy(3)
            .run("test", &token, |_| async { Ok(()) })
            .await;
        assert!(matches!(
            result,
            Err(RetryError::Cancelled {
                attempts: 0,
                last: None
            })
        ));
    }

    #[test]
    fn test_circuit_errors_are_classified() {
        let open: CircuitError<TestError> = CircuitError::Open {
            name: "p".to_string(),
        };
        let timeout: CircuitError<TestError> = CircuitError::Timeout {
            name: "p".to_string(),
            timeout: Duration::from_millis(1),
        };
        assert_eq!(open.category(), ErrorCategory::NonRetryable);
        assert_eq!(timeout.category(), ErrorCategory::Retryable);
        assert_eq!(
            CircuitError::Inner(TestError::Permanent).category(),
            ErrorCategory::NonRetryable
        );
    }
}
