//! Configuration module for the admission engine.
//!
//! Loads one YAML document, interpolates environment variables and
//! validates every section before anything is constructed. Missing
//! sections take their defaults.
//!
//! # Usage
//!
//! ```rust,ignore
//! use admission_engine::config::load_config;
//!
//! // Load from default path (admission.yaml)
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("config/admission.yaml"))?;
//!
//! let gate_config = config.gate_config();
//! ```

mod health;
mod observability;
mod persistence;
mod resilience;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gate::{FallbackConfig, GateConfig, PrimaryConfig};
use crate::ladder::RiskLadderConfig;
use crate::scoring::Policy;

pub use health::HealthConfig;
pub use observability::{LogFormat, LoggingConfig, ObservabilityConfig};
pub use persistence::PersistenceConfig;
pub use resilience::{CircuitBreakerSettings, ResilienceConfig, RetrySettings};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scoring policy.
    #[serde(default)]
    pub policy: Policy,
    /// Risk ladder.
    #[serde(default)]
    pub ladder: RiskLadderConfig,
    /// Breaker, retry and emergency settings.
    #[serde(default)]
    pub resilience: ResilienceConfig,
    /// Fallback validator thresholds.
    #[serde(default)]
    pub fallback: FallbackConfig,
    /// Built-in primary validator settings.
    #[serde(default)]
    pub primary: PrimaryConfig,
    /// Health checks.
    #[serde(default)]
    pub health: HealthConfig,
    /// Ladder state persistence.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Logging.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Settings for [`crate::gate::ResilientGate`].
    #[must_use]
    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            circuit_breaker: self.resilience.circuit_breaker.to_resilience_config(),
            retry: self.resilience.retry.to_retry_policy(),
            emergency_failure_threshold: self.resilience.emergency_failure_threshold,
            fallback: self.fallback.clone(),
            health_cache_ttl: self.health.cache_ttl(),
            max_in_flight: self.health.max_in_flight,
        }
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "admission.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<EngineConfig, ConfigError> {
    let path = path.unwrap_or("admission.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<EngineConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: EngineConfig = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. A variable that is
/// unset or empty takes the default, or the empty string without one.
#[allow(clippy::expect_used)] // Regex is a compile-time constant
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let default_value = caps.get(2).map_or("", |m| m.as_str());
        match std::env::var(&caps[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    config
        .policy
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("policy: {e}")))?;

    config
        .ladder
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("ladder: {e}")))?;

    let cb = &config.resilience.circuit_breaker;
    if cb.failure_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "resilience.circuit_breaker.failure_threshold must be at least 1".to_string(),
        ));
    }
    if cb.call_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "resilience.circuit_breaker.call_timeout_ms must be positive".to_string(),
        ));
    }
    if cb.permitted_calls_in_half_open == 0 {
        return Err(ConfigError::ValidationError(
            "resilience.circuit_breaker.permitted_calls_in_half_open must be at least 1"
                .to_string(),
        ));
    }

    let retry = &config.resilience.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "resilience.retry.max_attempts must be at least 1".to_string(),
        ));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(ConfigError::ValidationError(
            "resilience.retry.base_delay_ms must not exceed max_delay_ms".to_string(),
        ));
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "resilience.retry.multiplier must be >= 1.0".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&retry.jitter_factor) {
        return Err(ConfigError::ValidationError(
            "resilience.retry.jitter_factor must be between 0.0 and 1.0".to_string(),
        ));
    }

    if config.resilience.emergency_failure_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "resilience.emergency_failure_threshold must be at least 1".to_string(),
        ));
    }

    config
        .fallback
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("fallback: {e}")))?;

    config
        .primary
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("primary: {e}")))?;

    if config.health.max_in_flight == 0 {
        return Err(ConfigError::ValidationError(
            "health.max_in_flight must be positive".to_string(),
        ));
    }

    if config.persistence.enabled && config.persistence.ladder_state_path.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "persistence.ladder_state_path must be set when persistence is enabled".to_string(),
        ));
    }

    Ok(())
}
