//! Resilient admission gate.
//!
//! Every request is validated twice: by the primary validator, reached
//! through a per-strategy circuit breaker and a retry policy, and by the
//! formula-based fallback. Both must approve. When the primary cannot be
//! reached the fallback decides alone and the result is flagged degraded.
//! Repeated primary failures latch emergency mode for the strategy.
//!
//! # Example
//!
//! ```rust,ignore
//! use admission_engine::gate::{GateConfig, ResilientGate, RiskLimitValidator};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let gate = ResilientGate::new(GateConfig::default(), Arc::new(RiskLimitValidator::default()));
//! let result = gate.execute_resilient_trade(&request, &CancellationToken::new()).await;
//! if result.executed {
//!     // route the order
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::emergency::EmergencyTracker;
use super::fallback::{FallbackConfig, FallbackValidator};
use super::primary::{PrimaryValidator, ValidatorError};
use super::types::{
    ReasonCode, StatusSnapshot, TradeExecutionResult, TradeRequest, ValidationMethod,
    ValidationResult, Verdict,
};
use crate::observability::{record_admission_decision, record_admission_latency};
use crate::resilience::{
    CapacityProbe, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerState,
    CircuitError, CircuitProbe, HealthChecker, HealthProbe, InFlightCounter, RetryError,
    RetryPolicy,
};

/// Errors from gate operator actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// A fresh health check did not come back healthy.
    #[error("cannot clear emergency mode for '{key}': health not confirmed ({})", .issues.join("; "))]
    HealthNotConfirmed {
        /// Strategy key.
        key: String,
        /// Unhealthy probes.
        issues: Vec<String>,
    },

    /// The key is not in emergency mode.
    #[error("strategy '{0}' is not in emergency mode")]
    NotInEmergency(String),
}

/// Gate settings.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Breaker settings shared by every strategy key.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry policy around each primary call.
    pub retry: RetryPolicy,
    /// Consecutive primary failures that latch emergency mode.
    pub emergency_failure_threshold: u32,
    /// Fallback thresholds.
    pub fallback: FallbackConfig,
    /// Health report cache lifetime.
    pub health_cache_ttl: Duration,
    /// In-flight admissions at which the capacity probe turns unhealthy.
    pub max_in_flight: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            emergency_failure_threshold: 3,
            fallback: FallbackConfig::default(),
            health_cache_ttl: Duration::from_secs(1),
            max_in_flight: 64,
        }
    }
}

/// Primary validator wrapped in breaker, retry and fallback cross-check.
pub struct ResilientGate {
    config: GateConfig,
    primary: Arc<dyn PrimaryValidator>,
    fallback: FallbackValidator,
    breakers: Arc<CircuitBreakerRegistry>,
    emergency: EmergencyTracker,
    health: HealthChecker,
    in_flight: Arc<InFlightCounter>,
    total_requests: AtomicU64,
    total_approved: AtomicU64,
    total_denied: AtomicU64,
}

impl std::fmt::Debug for ResilientGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientGate")
            .field("config", &self.config)
            .field("breakers", &self.breakers)
            .field("emergency", &self.emergency)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

fn breaker_key(strategy_key: &str) -> String {
    format!("primary:{strategy_key}")
}

impl ResilientGate {
    /// Gate around `primary`. Health covers circuits and in-flight capacity;
    /// add host probes with [`ResilientGate::with_probe`].
    #[must_use]
    pub fn new(config: GateConfig, primary: Arc<dyn PrimaryValidator>) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        let in_flight = Arc::new(InFlightCounter::new());
        let health = HealthChecker::new(config.health_cache_ttl)
            .with_probe(Arc::new(CircuitProbe::new(Arc::clone(&breakers))))
            .with_probe(Arc::new(CapacityProbe::new(
                "admissions",
                Arc::clone(&in_flight),
                config.max_in_flight,
            )));

        Self {
            fallback: FallbackValidator::new(config.fallback.clone()),
            emergency: EmergencyTracker::new(config.emergency_failure_threshold),
            config,
            primary,
            breakers,
            health,
            in_flight,
            total_requests: AtomicU64::new(0),
            total_approved: AtomicU64::new(0),
            total_denied: AtomicU64::new(0),
        }
    }

    /// Add a health probe (e.g. a market data [`crate::resilience::FreshnessProbe`]).
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health = self.health.with_probe(probe);
        self
    }

    /// Settings in force.
    #[must_use]
    pub const fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Breaker registry, keyed `primary:<strategy_key>`.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Whether `strategy_key` is in emergency mode.
    #[must_use]
    pub fn is_emergency(&self, strategy_key: &str) -> bool {
        self.emergency.is_active(strategy_key)
    }

    /// Admit or deny one trade.
    pub async fn execute_resilient_trade(
        &self,
        request: &TradeRequest,
        cancel: &CancellationToken,
    ) -> TradeExecutionResult {
        let operation_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "admission",
            %operation_id,
            account_id = %request.account_id,
            strategy_key = %request.candidate.strategy_key,
        );
        self.execute_inner(operation_id, request, cancel)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        operation_id: Uuid,
        request: &TradeRequest,
        cancel: &CancellationToken,
    ) -> TradeExecutionResult {
        let started = Instant::now();
        let _in_flight = self.in_flight.enter();
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let key = request.candidate.strategy_key.as_str();

        let (validation, reason, executed, degraded) = if self.emergency.is_active(key) {
            tracing::warn!("Denied: strategy is in emergency mode");
            (None, ReasonCode::EmergencyMode, false, false)
        } else {
            let validation = self.validate_with_resilience(request, cancel).await;
            let reason = validation.reason;
            let approved = validation.approved;
            let degraded = validation.degraded;
            (Some(validation), reason, approved, degraded)
        };

        let emergency_mode = self.emergency.is_active(key);
        let circuit_state = self
            .breakers
            .get(&breaker_key(key))
            .map_or(CircuitBreakerState::Closed, |b| b.state());
        let success = validation.is_some() && !degraded;

        if executed {
            self.total_approved.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_denied.fetch_add(1, Ordering::Relaxed);
        }

        let elapsed = started.elapsed();
        record_admission_decision(
            if executed { "approved" } else { "denied" },
            reason.as_str(),
            degraded,
        );
        record_admission_latency(elapsed.as_secs_f64());

        tracing::info!(
            executed,
            %reason,
            degraded,
            emergency_mode,
            %circuit_state,
            elapsed_ms = elapsed.as_millis(),
            "Admission decided"
        );

        TradeExecutionResult {
            operation_id,
            success,
            executed,
            reason,
            validation,
            circuit_state,
            emergency_mode,
            degraded,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Run primary (through breaker and retry) and fallback, and combine.
    ///
    /// Does not consult emergency mode; it does feed it.
    pub async fn validate_with_resilience(
        &self,
        request: &TradeRequest,
        cancel: &CancellationToken,
    ) -> ValidationResult {
        let key = request.candidate.strategy_key.as_str();
        let primary = match self.call_primary(request, cancel).await {
            Ok(verdict) => {
                self.emergency.record_success(key);
                Some(verdict)
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(attempts = e.attempts(), "Primary validation cancelled");
                None
            }
            Err(e) => {
                tracing::warn!(
                    attempts = e.attempts(),
                    circuit_open = e.last_error().is_some_and(CircuitError::is_unavailable),
                    error = %e,
                    "Primary validator unavailable; using fallback alone"
                );
                self.emergency.record_failure(key);
                None
            }
        };

        let fallback = self.fallback.validate(request);
        combine(primary, fallback)
    }

    async fn call_primary(
        &self,
        request: &TradeRequest,
        cancel: &CancellationToken,
    ) -> Result<Verdict, RetryError<CircuitError<ValidatorError>>> {
        let breaker = self
            .breakers
            .get_or_create(&breaker_key(&request.candidate.strategy_key));
        let breaker = &breaker;
        let primary = self.primary.as_ref();

        self.config
            .retry
            .run("primary_validation", cancel, move |_attempt| async move {
                breaker.call(|| primary.validate(request)).await
            })
            .await
    }

    /// Health, breakers, emergency latches and request counters.
    #[must_use]
    pub fn resilience_status(&self) -> StatusSnapshot {
        StatusSnapshot {
            health: self.health.check(),
            circuits: self.breakers.all_metrics(),
            emergency: self.emergency.statuses(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_approved: self.total_approved.load(Ordering::Relaxed),
            total_denied: self.total_denied.load(Ordering::Relaxed),
        }
    }

    /// Close the breaker for `strategy_key` after the dependency is known
    /// to have recovered.
    pub fn reset_circuit(&self, strategy_key: &str) {
        if let Some(breaker) = self.breakers.get(&breaker_key(strategy_key)) {
            breaker.force_close();
        }
    }

    /// Leave emergency mode for `strategy_key`. Requires a fresh report in
    /// which every shared probe is healthy and this key's own breaker is
    /// closed; breakers of other strategy keys are not consulted.
    pub fn clear_emergency(&self, strategy_key: &str) -> Result<(), GateError> {
        if !self.emergency.is_active(strategy_key) {
            return Err(GateError::NotInEmergency(strategy_key.to_string()));
        }

        let report = self.health.check_now().without(CircuitProbe::NAME);
        let mut issues = report.issues();
        let name = breaker_key(strategy_key);
        let circuit_state = self
            .breakers
            .get(&name)
            .map_or(CircuitBreakerState::Closed, |b| b.state());
        if circuit_state != CircuitBreakerState::Closed {
            issues.push(format!("{name}: {circuit_state}"));
        }

        if !issues.is_empty() {
            tracing::warn!(
                strategy_key,
                status = %report.status,
                %circuit_state,
                ?issues,
                "Emergency clear refused: health not confirmed"
            );
            return Err(GateError::HealthNotConfirmed {
                key: strategy_key.to_string(),
                issues,
            });
        }

        self.emergency.clear(strategy_key);
        Ok(())
    }
}

fn combine(primary: Option<Verdict>, fallback: Verdict) -> ValidationResult {
    let Some(primary) = primary else {
        return ValidationResult {
            approved: fallback.approved,
            max_loss: fallback.max_loss,
            reason: fallback.reason,
            methods: vec![ValidationMethod::Fallback],
            degraded: true,
            primary_verdict: None,
            fallback_verdict: fallback,
        };
    };

    let (approved, reason, methods) = match (primary.approved, fallback.approved) {
        (true, true) => (
            true,
            ReasonCode::Approved,
            vec![ValidationMethod::Primary, ValidationMethod::Fallback],
        ),
        (true, false) => {
            tracing::warn!(fallback_reason = %fallback.reason, "Validators disagree; fallback denies");
            (
                false,
                ReasonCode::FallbackRejected,
                vec![ValidationMethod::Fallback],
            )
        }
        (false, true) => {
            tracing::warn!(primary_reason = %primary.reason, "Validators disagree; primary denies");
            (
                false,
                ReasonCode::PrimaryRejected,
                vec![ValidationMethod::Primary],
            )
        }
        (false, false) => (
            false,
            primary.reason,
            vec![ValidationMethod::Primary, ValidationMethod::Fallback],
        ),
    };

    ValidationResult {
        approved,
        max_loss: primary.max_loss.max(fallback.max_loss),
        reason,
        methods,
        degraded: false,
        primary_verdict: Some(primary),
        fallback_verdict: fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::primary::MockPrimaryValidator;
    use crate::gate::types::{RiskBudget, TradeCandidate};
    use crate::scoring::StrategyKind;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn request() -> TradeRequest {
        TradeRequest {
            account_id: "acct".to_string(),
            candidate: TradeCandidate {
                strategy_key: "pcs".to_string(),
                strategy: StrategyKind::PutCreditSpread,
                contracts: 1,
                net_credit: dec!(0.20),
                spread_width: dec!(5),
                liquidity_score: 0.8,
                bid_ask_spread: dec!(0.05),
                proposed_at: Utc::now(),
            },
            budget: RiskBudget {
                risk_limit: dec!(500),
                account_equity: dec!(50000),
            },
        }
    }

    fn fast_config() -> GateConfig {
        GateConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
                call_timeout: Duration::from_millis(200),
                permitted_calls_in_half_open: 1,
            },
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
            ..GateConfig::default()
        }
    }

    fn approving() -> MockPrimaryValidator {
        let mut mock = MockPrimaryValidator::new();
        mock.expect_validate()
            .returning(|_| Ok(Verdict::approve(dec!(480))));
        mock
    }

    fn failing() -> MockPrimaryValidator {
        let mut mock = MockPrimaryValidator::new();
        mock.expect_validate()
            .returning(|_| Err(ValidatorError::Transient("down".to_string())));
        mock
    }

    #[tokio::test]
    async fn both_approve_executes() {
        let gate = ResilientGate::new(fast_config(), Arc::new(approving()));
        let result = gate
            .execute_resilient_trade(&request(), &CancellationToken::new())
            .await;
        assert!(result.success);
        assert!(result.executed);
        assert_eq!(result.reason, ReasonCode::Approved);
        assert!(!result.degraded);
        assert_eq!(result.circuit_state, CircuitBreakerState::Closed);
        let validation = result.validation.unwrap();
        assert_eq!(
            validation.methods,
            vec![ValidationMethod::Primary, ValidationMethod::Fallback]
        );
    }

    #[tokio::test]
    async fn fallback_denial_overrides_primary_approval() {
        let gate = ResilientGate::new(fast_config(), Arc::new(approving()));
        let mut req = request();
        req.candidate.bid_ask_spread = dec!(0.50);
        let result = gate
            .execute_resilient_trade(&req, &CancellationToken::new())
            .await;
        assert!(!result.executed);
        assert_eq!(result.reason, ReasonCode::FallbackRejected);
        let validation = result.validation.unwrap();
        assert_eq!(validation.fallback_verdict.reason, ReasonCode::WideBidAsk);
    }

    #[tokio::test]
    async fn primary_denial_overrides_fallback_approval() {
        let mut mock = MockPrimaryValidator::new();
        mock.expect_validate()
            .returning(|_| Ok(Verdict::deny(dec!(480), ReasonCode::OutsideTradingWindow)));
        let gate = ResilientGate::new(fast_config(), Arc::new(mock));
        let result = gate
            .execute_resilient_trade(&request(), &CancellationToken::new())
            .await;
        assert!(!result.executed);
        assert!(result.success);
        assert_eq!(result.reason, ReasonCode::PrimaryRejected);
    }

    #[tokio::test]
    async fn unavailable_primary_degrades_to_fallback() {
        let gate = ResilientGate::new(fast_config(), Arc::new(failing()));
        let result = gate
            .execute_resilient_trade(&request(), &CancellationToken::new())
            .await;
        assert!(result.executed);
        assert!(result.degraded);
        assert!(!result.success);
        let validation = result.validation.unwrap();
        assert!(validation.primary_verdict.is_none());
        assert_eq!(validation.methods, vec![ValidationMethod::Fallback]);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let mut mock = MockPrimaryValidator::new();
        mock.expect_validate()
            .times(1)
            .returning(|_| Err(ValidatorError::Permanent("schema".to_string())));
        let gate = ResilientGate::new(fast_config(), Arc::new(mock));
        let validation = gate
            .validate_with_resilience(&request(), &CancellationToken::new())
            .await;
        assert!(validation.degraded);
    }

    #[tokio::test]
    async fn repeated_failures_latch_emergency_mode() {
        let config = GateConfig {
            emergency_failure_threshold: 2,
            ..fast_config()
        };
        let gate = ResilientGate::new(config, Arc::new(failing()));
        let token = CancellationToken::new();

        let first = gate.execute_resilient_trade(&request(), &token).await;
        assert!(!first.emergency_mode);
        let second = gate.execute_resilient_trade(&request(), &token).await;
        assert!(second.emergency_mode);

        let blocked = gate.execute_resilient_trade(&request(), &token).await;
        assert!(!blocked.executed);
        assert_eq!(blocked.reason, ReasonCode::EmergencyMode);
        assert!(blocked.validation.is_none());
    }

    #[tokio::test]
    async fn clear_emergency_requires_healthy_circuits() {
        let config = GateConfig {
            emergency_failure_threshold: 2,
            ..fast_config()
        };
        let gate = ResilientGate::new(config, Arc::new(failing()));
        let token = CancellationToken::new();
        gate.execute_resilient_trade(&request(), &token).await;
        gate.execute_resilient_trade(&request(), &token).await;
        assert!(gate.is_emergency("pcs"));

        // Six primary failures opened the breaker.
        let err = gate.clear_emergency("pcs").unwrap_err();
        assert!(matches!(err, GateError::HealthNotConfirmed { .. }));
        assert!(gate.is_emergency("pcs"));

        gate.reset_circuit("pcs");
        gate.clear_emergency("pcs").unwrap();
        assert!(!gate.is_emergency("pcs"));
        assert_eq!(
            gate.clear_emergency("pcs"),
            Err(GateError::NotInEmergency("pcs".to_string()))
        );
    }

    #[tokio::test]
    async fn clear_emergency_ignores_other_strategies_circuits() {
        let config = GateConfig {
            emergency_failure_threshold: 2,
            ..fast_config()
        };
        let gate = ResilientGate::new(config, Arc::new(failing()));
        let token = CancellationToken::new();
        gate.execute_resilient_trade(&request(), &token).await;
        gate.execute_resilient_trade(&request(), &token).await;
        assert!(gate.is_emergency("pcs"));

        gate.breakers().get_or_create("primary:ic").force_open();
        gate.reset_circuit("pcs");
        assert!(!gate.resilience_status().health.is_healthy());

        gate.clear_emergency("pcs").unwrap();
        assert!(!gate.is_emergency("pcs"));
    }

    #[tokio::test]
    async fn status_counts_requests() {
        let gate = ResilientGate::new(fast_config(), Arc::new(approving()));
        let token = CancellationToken::new();
        gate.execute_resilient_trade(&request(), &token).await;
        let mut bad = request();
        bad.candidate.contracts = 0;
        gate.execute_resilient_trade(&bad, &token).await;

        let status = gate.resilience_status();
        assert_eq!(status.total_requests, 2);
        assert_eq!(status.total_approved, 1);
        assert_eq!(status.total_denied, 1);
        assert_eq!(status.circuits.len(), 1);
        assert!(status.health.is_healthy());
    }

    #[test]
    fn both_denying_reports_primary_reason() {
        let result = combine(
            Some(Verdict::deny(dec!(480), ReasonCode::ExceedsRiskLimit)),
            Verdict::deny(Decimal::ZERO, ReasonCode::InvalidStructure),
        );
        assert!(!result.approved);
        assert_eq!(result.reason, ReasonCode::ExceedsRiskLimit);
        assert_eq!(result.max_loss, dec!(480));
    }
}
