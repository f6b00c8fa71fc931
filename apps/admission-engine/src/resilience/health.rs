//! Aggregate health checking.
//!
//! Probes are synchronous and cheap. The checker caches the aggregate
//! report for a short TTL so status queries never fan out to every probe
//! on the admission hot path. The aggregate status is the worst probe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerState};

// ============================================================================
// Status
// ============================================================================

/// Health status, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Degraded but usable.
    Warning,
    /// Not usable.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Warning => write!(f, "WARNING"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// One probe's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Probe name.
    pub name: String,
    /// Probe status.
    pub status: HealthStatus,
    /// Human-readable detail.
    pub detail: String,
}

impl ProbeReport {
    fn new(name: &str, status: HealthStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

/// Aggregate health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst probe status.
    pub status: HealthStatus,
    /// Every probe's result, in registration order.
    pub probes: Vec<ProbeReport>,
    /// When the probes ran.
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Whether every probe is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Probes that are not healthy, as `name: detail`.
    #[must_use]
    pub fn issues(&self) -> Vec<String> {
        self.probes
            .iter()
            .filter(|p| p.status != HealthStatus::Healthy)
            .map(|p| format!("{}: {}", p.name, p.detail))
            .collect()
    }

    /// Copy of this report without the probe named `name`, with the
    /// status recomputed from the rest.
    #[must_use]
    pub fn without(&self, name: &str) -> Self {
        let probes: Vec<ProbeReport> = self
            .probes
            .iter()
            .filter(|p| p.name != name)
            .cloned()
            .collect();
        let status = probes
            .iter()
            .map(|p| p.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            probes,
            checked_at: self.checked_at,
        }
    }
}

// ============================================================================
// Probes
// ============================================================================

/// A cheap synchronous health probe.
pub trait HealthProbe: Send + Sync {
    /// Probe name used in reports.
    fn name(&self) -> &str;

    /// Run the probe.
    fn check(&self) -> ProbeReport;
}

/// Last-seen time of some data source.
#[derive(Debug, Default)]
pub struct Heartbeat {
    last: RwLock<Option<Instant>>,
}

impl Heartbeat {
    /// Create a heartbeat that has never beaten.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that data arrived now.
    pub fn beat(&self) {
        *self
            .last
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Instant::now());
    }

    /// Time since the last beat.
    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        self.last
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .map(|t| t.elapsed())
    }
}

/// Data staleness probe: Warning past the threshold, Unhealthy past 3x.
#[derive(Debug)]
pub struct FreshnessProbe {
    name: String,
    heartbeat: Arc<Heartbeat>,
    threshold: Duration,
}

impl FreshnessProbe {
    /// Probe `heartbeat` against `threshold`.
    pub fn new(name: impl Into<String>, heartbeat: Arc<Heartbeat>, threshold: Duration) -> Self {
        Self {
            name: name.into(),
            heartbeat,
            threshold,
        }
    }
}

impl HealthProbe for FreshnessProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> ProbeReport {
        let Some(age) = self.heartbeat.age() else {
            return ProbeReport::new(&self.name, HealthStatus::Unhealthy, "no data received");
        };
        let age_ms = age.as_millis();
        let status = if age > self.threshold.saturating_mul(3) {
            HealthStatus::Unhealthy
        } else if age > self.threshold {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };
        ProbeReport::new(&self.name, status, format!("last data {age_ms}ms ago"))
    }
}

/// Count of operations currently in flight.
#[derive(Debug, Default)]
pub struct InFlightCounter {
    count: AtomicUsize,
}

impl InFlightCounter {
    /// Create a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one operation in flight until the guard drops.
    #[must_use]
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            counter: Arc::clone(self),
        }
    }

    /// Operations in flight.
    #[must_use]
    pub fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// Decrements its [`InFlightCounter`] on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    counter: Arc<InFlightCounter>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Capacity probe: Warning at 80% utilization, Unhealthy at capacity.
#[derive(Debug)]
pub struct CapacityProbe {
    name: String,
    counter: Arc<InFlightCounter>,
    capacity: usize,
}

impl CapacityProbe {
    /// Probe `counter` against `capacity`.
    pub fn new(name: impl Into<String>, counter: Arc<InFlightCounter>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            counter,
            capacity,
        }
    }
}

impl HealthProbe for CapacityProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> ProbeReport {
        let current = self.counter.current();
        let capacity = self.capacity.max(1);
        // current / capacity >= 0.8, in integers
        let status = if current >= capacity {
            HealthStatus::Unhealthy
        } else if current * 5 >= capacity * 4 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };
        ProbeReport::new(&self.name, status, format!("{current}/{capacity} in flight"))
    }
}

/// Circuit probe: any open breaker is Unhealthy, any half-open a Warning.
#[derive(Debug)]
pub struct CircuitProbe {
    registry: Arc<CircuitBreakerRegistry>,
}

impl CircuitProbe {
    /// Name the probe reports under.
    pub const NAME: &'static str = "circuits";

    /// Probe every breaker in `registry`.
    #[must_use]
    pub const fn new(registry: Arc<CircuitBreakerRegistry>) -> Self {
        Self { registry }
    }
}

impl HealthProbe for CircuitProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn check(&self) -> ProbeReport {
        let metrics = self.registry.all_metrics();
        let not_closed: Vec<String> = metrics
            .iter()
            .filter(|m| m.state != CircuitBreakerState::Closed)
            .map(|m| format!("{}={}", m.name, m.state))
            .collect();

        let status = metrics
            .iter()
            .map(|m| match m.state {
                CircuitBreakerState::Closed => HealthStatus::Healthy,
                CircuitBreakerState::HalfOpen => HealthStatus::Warning,
                CircuitBreakerState::Open => HealthStatus::Unhealthy,
            })
            .max()
            .unwrap_or(HealthStatus::Healthy);

        let detail = if not_closed.is_empty() {
            format!("{} closed", metrics.len())
        } else {
            not_closed.join(", ")
        };
        ProbeReport::new(self.name(), status, detail)
    }
}

// ============================================================================
// Checker
// ============================================================================

/// Runs probes and caches the aggregate report.
pub struct HealthChecker {
    probes: Vec<Arc<dyn HealthProbe>>,
    cache_ttl: Duration,
    cached: RwLock<Option<(Instant, HealthReport)>>,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.probes.iter().map(|p| p.name()).collect();
        f.debug_struct("HealthChecker")
            .field("probes", &names)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

impl HealthChecker {
    /// Checker with no probes.
    #[must_use]
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            probes: Vec::new(),
            cache_ttl,
            cached: RwLock::new(None),
        }
    }

    /// Add a probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Cached report, refreshed when older than the TTL.
    #[must_use]
    pub fn check(&self) -> HealthReport {
        let cached = self
            .cached
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some((at, report)) = cached.as_ref()
            && at.elapsed() < self.cache_ttl
        {
            return report.clone();
        }
        drop(cached);
        self.check_now()
    }

    /// Run every probe now, bypassing and refreshing the cache.
    #[must_use]
    pub fn check_now(&self) -> HealthReport {
        let probes: Vec<ProbeReport> = self.probes.iter().map(|p| p.check()).collect();
        let status = probes
            .iter()
            .map(|p| p.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        let report = HealthReport {
            status,
            probes,
            checked_at: Utc::now(),
        };

        if status != HealthStatus::Healthy {
            tracing::debug!(%status, issues = ?report.issues(), "Health degraded");
        }

        *self
            .cached
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) =
            Some((Instant::now(), report.clone()));
        report
    }
}
