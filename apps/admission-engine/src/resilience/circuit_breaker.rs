//! Circuit breaker for the primary validation path.
//!
//! Stops calling a failing dependency after a run of consecutive failures,
//! then lets a single probe through once the recovery timeout has passed.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (consecutive failures >= failure_threshold)
//! OPEN → HALF_OPEN (recovery_timeout elapsed)
//! HALF_OPEN → CLOSED (probe succeeds)
//! HALF_OPEN → OPEN (probe fails)
//! ```
//!
//! A success while CLOSED resets the failure run. Calls that exceed
//! `call_timeout` count as failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use admission_engine::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitError};
//!
//! let breaker = CircuitBreaker::new("primary:ic-spx", CircuitBreakerConfig::default());
//!
//! match breaker.call(|| validator.validate(&request)).await {
//!     Ok(verdict) => { /* ... */ }
//!     Err(CircuitError::Open { .. }) => { /* fail fast, use fallback */ }
//!     Err(e) => { /* timeout or validator error */ }
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::{record_circuit_rejected, record_circuit_transition};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Circuit is closed, calls flow normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit is admitting a probe call.
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time to stay `OPEN` before admitting a probe.
    pub recovery_timeout: Duration,
    /// Maximum call duration before it counts as a failure.
    pub call_timeout: Duration,
    /// Concurrent probe calls admitted in `HALF_OPEN`.
    pub permitted_calls_in_half_open: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(2),
            permitted_calls_in_half_open: 1,
        }
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Circuit is open (or the half-open probe quota is taken); the
    /// operation was not invoked.
    #[error("circuit '{name}' is open")]
    Open {
        /// Breaker name.
        name: String,
    },

    /// The operation did not complete within the call timeout.
    #[error("call through circuit '{name}' timed out after {timeout:?}")]
    Timeout {
        /// Breaker name.
        name: String,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The operation itself failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    /// Whether the dependency is temporarily unavailable (as opposed to
    /// having answered with an error).
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The operation's own error, if that is what this is.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Admission ticket for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Permit {
    /// Normal call while `CLOSED`.
    Closed,
    /// Probe call while `HALF_OPEN`; releases its slot when recorded or abandoned.
    Probe,
}

/// Reserved call slot. Dropping it without recording an outcome (the call
/// future was cancelled) hands a probe slot back.
struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<Permit>,
}

impl PermitGuard<'_> {
    fn take(&mut self) -> Permit {
        self.permit.take().unwrap_or(Permit::Closed)
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            tracing::debug!(name = %self.breaker.name, ?permit, "Call abandoned before completing");
            self.breaker.release(permit);
        }
    }
}

/// Circuit breaker guarding one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitBreakerState>,
    /// When the circuit last opened (for the recovery timeout).
    opened_at: RwLock<Option<Instant>>,
    last_failure_at: RwLock<Option<DateTime<Utc>>>,
    consecutive_failures: AtomicU32,
    half_open_in_flight: AtomicU32,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejected: AtomicU64,
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitBreakerState::Closed),
            opened_at: RwLock::new(None),
            last_failure_at: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
            half_open_in_flight: AtomicU32::new(0),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, applying any due `OPEN` → `HALF_OPEN` transition.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.check_state_transition();
        self.current_state()
    }

    /// Whether a call would be admitted right now. Does not reserve a
    /// probe slot.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        match self.state() {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => false,
            CircuitBreakerState::HalfOpen => {
                self.half_open_in_flight.load(Ordering::Acquire)
                    < self.config.permitted_calls_in_half_open
            }
        }
    }

    /// Run `op` through the breaker.
    ///
    /// # Errors
    ///
    /// - [`CircuitError::Open`] without invoking `op` while the circuit is
    ///   open or the half-open quota is taken.
    /// - [`CircuitError::Timeout`] if `op` exceeds the call timeout.
    /// - [`CircuitError::Inner`] with `op`'s own error.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire() else {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            record_circuit_rejected(&self.name);
            tracing::debug!(name = %self.name, "Call rejected by open circuit");
            return Err(CircuitError::Open {
                name: self.name.clone(),
            });
        };

        let mut guard = PermitGuard {
            breaker: self,
            permit: Some(permit),
        };

        match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(Ok(value)) => {
                self.on_success(guard.take());
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure(guard.take());
                Err(CircuitError::Inner(e))
            }
            Err(_) => {
                tracing::warn!(
                    name = %self.name,
                    timeout_ms = self.config.call_timeout.as_millis(),
                    "Call timed out"
                );
                self.on_failure(guard.take());
                Err(CircuitError::Timeout {
                    name: self.name.clone(),
                    timeout: self.config.call_timeout,
                })
            }
        }
    }

    /// Record a successful call made outside [`CircuitBreaker::call`].
    pub fn record_success(&self) {
        let permit = self.permit_for_current_state();
        self.on_success(permit);
    }

    /// Record a failed call made outside [`CircuitBreaker::call`].
    pub fn record_failure(&self) {
        let permit = self.permit_for_current_state();
        self.on_failure(permit);
    }

    /// Reserve a call slot, or `None` if the call must be rejected.
    pub(crate) fn try_acquire(&self) -> Option<Permit> {
        match self.state() {
            CircuitBreakerState::Closed => Some(Permit::Closed),
            CircuitBreakerState::Open => None,
            CircuitBreakerState::HalfOpen => {
                let limit = self.config.permitted_calls_in_half_open;
                self.half_open_in_flight
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < limit).then_some(n + 1)
                    })
                    .ok()
                    .map(|_| Permit::Probe)
            }
        }
    }

    fn permit_for_current_state(&self) -> Permit {
        if self.state() == CircuitBreakerState::HalfOpen {
            self.half_open_in_flight.fetch_add(1, Ordering::AcqRel);
            Permit::Probe
        } else {
            Permit::Closed
        }
    }

    fn release(&self, permit: Permit) {
        if permit == Permit::Probe {
            let _ = self
                .half_open_in_flight
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }

    fn on_success(&self, permit: Permit) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.release(permit);

        match self.current_state() {
            CircuitBreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitBreakerState::HalfOpen => self.transition_to_closed(),
            CircuitBreakerState::Open => {
                // Admitted before the circuit opened; the outcome is stale.
                tracing::debug!(name = %self.name, "Late success ignored while OPEN");
            }
        }
    }

    fn on_failure(&self, permit: Permit) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.release(permit);
        *self
            .last_failure_at
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Utc::now());

        match self.current_state() {
            CircuitBreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to_open();
                }
            }
            CircuitBreakerState::HalfOpen => self.transition_to_open(),
            CircuitBreakerState::Open => {
                tracing::debug!(name = %self.name, "Late failure ignored while OPEN");
            }
        }
    }

    fn current_state(&self) -> CircuitBreakerState {
        *self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Check for time-based state transitions (`OPEN` -> `HALF_OPEN`).
    fn check_state_transition(&self) {
        if self.current_state() == CircuitBreakerState::Open
            && let Some(opened) = *self
                .opened_at
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
            && opened.elapsed() >= self.config.recovery_timeout
        {
            self.transition_to_half_open();
        }
    }

    fn transition_to_open(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = *state;
        if previous == CircuitBreakerState::Open {
            return;
        }
        *state = CircuitBreakerState::Open;
        drop(state);

        *self
            .opened_at
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Instant::now());
        self.half_open_in_flight.store(0, Ordering::Release);
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
        record_circuit_transition(&self.name, previous, CircuitBreakerState::Open);

        tracing::warn!(
            name = %self.name,
            from = %previous,
            to = "OPEN",
            consecutive_failures = self.consecutive_failures.load(Ordering::Acquire),
            recovery_ms = self.config.recovery_timeout.as_millis(),
            "Circuit breaker opened"
        );
    }

    fn transition_to_half_open(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = *state;
        if previous != CircuitBreakerState::Open {
            return;
        }
        *state = CircuitBreakerState::HalfOpen;
        drop(state);

        self.half_open_in_flight.store(0, Ordering::Release);
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
        record_circuit_transition(&self.name, previous, CircuitBreakerState::HalfOpen);

        tracing::info!(
            name = %self.name,
            from = %previous,
            to = "HALF_OPEN",
            "Circuit breaker testing"
        );
    }

    fn transition_to_closed(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = *state;
        if previous == CircuitBreakerState::Closed {
            return;
        }
        *state = CircuitBreakerState::Closed;
        drop(state);

        *self
            .opened_at
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        self.consecutive_failures.store(0, Ordering::Release);
        self.half_open_in_flight.store(0, Ordering::Release);
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
        record_circuit_transition(&self.name, previous, CircuitBreakerState::Closed);

        tracing::info!(
            name = %self.name,
            from = %previous,
            to = "CLOSED",
            "Circuit breaker closed"
        );
    }

    /// Snapshot of counters and state.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
            last_failure_at: *self
                .last_failure_at
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        }
    }

    /// Force the circuit open (operator action or tests).
    pub fn force_open(&self) {
        self.transition_to_open();
    }

    /// Force the circuit closed (operator action or tests).
    pub fn force_close(&self) {
        self.transition_to_closed();
    }
}

/// Metrics for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitBreakerState,
    /// Current run of consecutive failures.
    pub consecutive_failures: u32,
    /// Calls that ran (success or failure).
    pub total_calls: u64,
    /// Calls that failed or timed out.
    pub total_failures: u64,
    /// Calls rejected without running.
    pub total_rejected: u64,
    /// Number of state transitions.
    pub state_transitions: u64,
    /// Wall-clock time of the last failure.
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Breakers keyed by protected dependency, created on first use with a
/// shared configuration.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Registry creating breakers with `config`.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for `key`, creating it if needed.
    pub fn get_or_create(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.get(key) {
            return breaker;
        }
        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let breaker = breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone())))
            .clone();
        drop(breakers);
        breaker
    }

    /// Breaker for `key`, if one exists.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Metrics for every breaker, sorted by name.
    #[must_use]
    pub fn all_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut metrics: Vec<CircuitBreakerMetrics> =
            breakers.iter().map(|b| b.metrics()).collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// Number of breakers created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether no breaker has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
