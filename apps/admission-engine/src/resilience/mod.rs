//! Resilience patterns for the primary validation path.
//!
//! Circuit breakers, bounded retry with cancellable backoff, and cached
//! aggregate health checks.

mod circuit_breaker;
mod health;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerRegistry,
    CircuitBreakerState, CircuitError,
};
pub use health::{
    CapacityProbe, CircuitProbe, FreshnessProbe, HealthChecker, HealthProbe, HealthReport,
    HealthStatus, Heartbeat, InFlightCounter, InFlightGuard, ProbeReport,
};
pub use retry::{ErrorCategory, RetryError, RetryPolicy, Retryable};
