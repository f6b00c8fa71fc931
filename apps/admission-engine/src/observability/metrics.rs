//! Metrics for the admission engine.
//!
//! Recorded through the `metrics` facade; installing an exporter is left
//! to the host process. Without one installed every call is a no-op.

use metrics::{counter, gauge, histogram};

use crate::resilience::CircuitBreakerState;

// ============================================================================
// Admission Metrics
// ============================================================================

/// Record one gate decision.
///
/// # Arguments
///
/// * `outcome` - `approved` or `denied`
/// * `reason` - Machine-readable reason code
/// * `degraded` - Whether the fallback decided alone
pub fn record_admission_decision(outcome: &str, reason: &str, degraded: bool) {
    counter!(
        "admission_decisions_total",
        "outcome" => outcome.to_string(),
        "reason" => reason.to_string(),
        "degraded" => degraded.to_string()
    )
    .increment(1);
}

/// Record end-to-end gate latency.
pub fn record_admission_latency(seconds: f64) {
    histogram!("admission_latency_seconds").record(seconds);
}

// ============================================================================
// Ladder Metrics
// ============================================================================

/// Update the notch index gauge for an account.
#[allow(clippy::cast_precision_loss)]
pub fn record_ladder_index(account_id: &str, index: usize) {
    gauge!(
        "ladder_notch_index",
        "account" => account_id.to_string()
    )
    .set(index as f64);
}

// ============================================================================
// Circuit Breaker Metrics
// ============================================================================

/// Gauge value for a breaker state (0=closed, 1=open, 2=half-open).
#[must_use]
pub const fn circuit_state_value(state: CircuitBreakerState) -> f64 {
    match state {
        CircuitBreakerState::Closed => 0.0,
        CircuitBreakerState::Open => 1.0,
        CircuitBreakerState::HalfOpen => 2.0,
    }
}

/// Record a breaker state transition.
pub fn record_circuit_transition(
    name: &str,
    from: CircuitBreakerState,
    to: CircuitBreakerState,
) {
    counter!(
        "circuit_breaker_transitions_total",
        "name" => name.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);

    gauge!(
        "circuit_breaker_state",
        "name" => name.to_string()
    )
    .set(circuit_state_value(to));
}

/// Record a call rejected without running (open circuit or half-open quota).
pub fn record_circuit_rejected(name: &str) {
    counter!(
        "circuit_breaker_rejected_total",
        "name" => name.to_string()
    )
    .increment(1);
}

// ============================================================================
// Retry / Emergency Metrics
// ============================================================================

/// Record a retry about to sleep.
pub fn record_retry(operation: &str, attempt: u32) {
    counter!(
        "retry_attempts_total",
        "operation" => operation.to_string(),
        "attempt" => attempt.to_string()
    )
    .increment(1);
}

/// Update the emergency mode gauge for a strategy key.
pub fn record_emergency_mode(strategy_key: &str, active: bool) {
    gauge!(
        "gate_emergency_mode",
        "strategy_key" => strategy_key.to_string()
    )
    .set(if active { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state_values() {
        assert!(circuit_state_value(CircuitBreakerState::Closed).abs() < f64::EPSILON);
        assert!((circuit_state_value(CircuitBreakerState::Open) - 1.0).abs() < f64::EPSILON);
        assert!((circuit_state_value(CircuitBreakerState::HalfOpen) - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recording_without_exporter_is_noop() {
        record_admission_decision("approved", "APPROVED", false);
        record_admission_latency(0.002);
        record_ladder_index("acct", 3);
        record_circuit_transition(
            "primary",
            CircuitBreakerState::Closed,
            CircuitBreakerState::Open,
        );
        record_circuit_rejected("primary");
        record_retry("primary", 2);
        record_emergency_mode("ic-spx", true);
    }
}
