//! Logging Setup
//!
//! Installs a `tracing-subscriber` registry for the host process.
//!
//! # Configuration
//!
//! - `observability.logging.level`: default filter (e.g. `info`,
//!   `admission_engine=debug`)
//! - `observability.logging.format`: `json` or `pretty`
//! - `RUST_LOG`: overrides the configured level when set
//!
//! # Usage
//!
//! ```rust,ignore
//! use admission_engine::{config::load_config, telemetry::init_logging};
//!
//! let config = load_config(Some("admission.yaml"))?;
//! init_logging(&config.observability.logging)?;
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig};

/// Logging initialization failure.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter {
        /// Offending directive.
        filter: String,
        /// Parser message.
        message: String,
    },

    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    AlreadyInstalled(String),
}

/// Build the filter: `RUST_LOG` if set, else the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| TelemetryError::InvalidFilter {
        filter: config.level.clone(),
        message: e.to_string(),
    })
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the level is not a valid filter or a subscriber has
/// already been installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;

    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(config.include_spans)
                    .with_span_list(config.include_spans),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };

    result.map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))?;

    tracing::info!(
        level = %config.level,
        format = ?config.format,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_is_rejected() {
        let config = LoggingConfig {
            level: "admission_engine=notalevel".to_string(),
            ..Default::default()
        };
        // RUST_LOG may be set in CI; only assert when it is not.
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(
                env_filter(&config),
                Err(TelemetryError::InvalidFilter { .. })
            ));
        }
    }

    #[test]
    fn default_level_parses() {
        assert!(env_filter(&LoggingConfig::default()).is_ok());
    }
}
