//! Resilience configuration for the primary validation path.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resilience configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Breaker settings, shared by every strategy key.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    /// Retry settings.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Consecutive primary failures that latch emergency mode.
    #[serde(default = "default_emergency_failure_threshold")]
    pub emergency_failure_threshold: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
            emergency_failure_threshold: default_emergency_failure_threshold(),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time in open state before a probe (milliseconds).
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    /// Per-call timeout (milliseconds).
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Calls permitted in half-open state.
    #[serde(default = "default_permitted_calls")]
    pub permitted_calls_in_half_open: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            permitted_calls_in_half_open: default_permitted_calls(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Convert config settings to the resilience module's `CircuitBreakerConfig`.
    #[must_use]
    pub const fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            permitted_calls_in_half_open: self.permitted_calls_in_half_open,
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff unit (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Exponential growth factor.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1]`.
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_factor: 0.0,
        }
    }
}

impl RetrySettings {
    /// Convert config settings to a `RetryPolicy`.
    #[must_use]
    pub const fn to_retry_policy(&self) -> crate::resilience::RetryPolicy {
        crate::resilience::RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter_factor: self.jitter_factor,
        }
    }
}

const fn default_emergency_failure_threshold() -> u32 {
    3
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout_ms() -> u64 {
    30_000
}

const fn default_call_timeout_ms() -> u64 {
    2_000
}

const fn default_permitted_calls() -> u32 {
    1
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    50
}

const fn default_max_delay_ms() -> u64 {
    1_000
}

const fn default_multiplier() -> f64 {
    2.0
}
