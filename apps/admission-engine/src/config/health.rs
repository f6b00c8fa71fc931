//! Health check configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Health check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// How long an aggregate report is reused (milliseconds).
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// In-flight admissions at which the gate reports unhealthy.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: default_cache_ttl_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl HealthConfig {
    /// Cache TTL as a duration.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

const fn default_cache_ttl_ms() -> u64 {
    1_000
}

const fn default_max_in_flight() -> usize {
    64
}
