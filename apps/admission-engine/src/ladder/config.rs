//! RevFibNotch ladder configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ladder configuration failures. All of these abort startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LadderConfigError {
    /// Fewer than two rungs.
    #[error("ladder needs at least 2 limits, got {0}")]
    TooFewLimits(usize),

    /// A limit is zero or negative.
    #[error("ladder limit at index {index} must be positive, got {value}")]
    NonPositiveLimit {
        /// Rung index.
        index: usize,
        /// Offending limit.
        value: Decimal,
    },

    /// Limits are not strictly decreasing.
    #[error("ladder limits must be strictly decreasing: index {index} ({value}) >= previous ({previous})")]
    NotDecreasing {
        /// Rung index.
        index: usize,
        /// Offending limit.
        value: Decimal,
        /// Limit of the rung before it.
        previous: Decimal,
    },

    /// Default index is outside the ladder.
    #[error("default_index {index} is outside the ladder (0..{len})")]
    DefaultIndexOutOfRange {
        /// Configured default index.
        index: usize,
        /// Ladder length.
        len: usize,
    },

    /// A scalar tunable is out of range.
    #[error("invalid ladder setting '{field}': {message}")]
    InvalidSetting {
        /// Setting name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Ordered risk limits plus movement tunables.
///
/// Index 0 is the most aggressive (largest) limit, the last index the most
/// conservative (smallest).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLadderConfig {
    /// Strictly decreasing per-trade risk limits.
    #[serde(default = "default_limits")]
    pub limits: Vec<Decimal>,
    /// Rung a fresh ladder starts on.
    #[serde(default = "default_index")]
    pub default_index: usize,
    /// Win rate strictly below which protection engages.
    #[serde(default = "default_win_rate_threshold")]
    pub win_rate_threshold: f64,
    /// Win-rate deficit per additional protective notch.
    #[serde(default = "default_win_rate_step")]
    pub win_rate_step: f64,
    /// Daily P&L at or below which the protective trigger fires (negative).
    #[serde(default = "default_protective_trigger_loss")]
    pub protective_trigger_loss: Decimal,
    /// Notches per 100 of daily loss.
    #[serde(default = "default_scaling_sensitivity")]
    pub scaling_sensitivity: Decimal,
    /// Consecutive non-adverse days required before moving aggressive.
    #[serde(default = "default_confirmation_days")]
    pub confirmation_days: u32,
    /// Size multiplier applied by the position sizer under market stress.
    #[serde(default = "default_market_stress_multiplier")]
    pub market_stress_multiplier: Decimal,
    /// Daily outcomes retained in state history.
    #[serde(default = "default_history_len")]
    pub history_len: usize,
}

impl Default for RiskLadderConfig {
    fn default() -> Self {
        Self {
            limits: default_limits(),
            default_index: default_index(),
            win_rate_threshold: default_win_rate_threshold(),
            win_rate_step: default_win_rate_step(),
            protective_trigger_loss: default_protective_trigger_loss(),
            scaling_sensitivity: default_scaling_sensitivity(),
            confirmation_days: default_confirmation_days(),
            market_stress_multiplier: default_market_stress_multiplier(),
            history_len: default_history_len(),
        }
    }
}

impl RiskLadderConfig {
    /// Number of rungs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.limits.len()
    }

    /// Whether the ladder has no rungs (never true once validated).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// Most conservative index.
    #[must_use]
    pub fn max_index(&self) -> usize {
        self.limits.len().saturating_sub(1)
    }

    /// Validate and return the config, consuming it.
    pub fn validated(self) -> Result<Self, LadderConfigError> {
        self.validate()?;
        Ok(self)
    }

    /// Check ordering, ranges and tunables.
    pub fn validate(&self) -> Result<(), LadderConfigError> {
        if self.limits.len() < 2 {
            return Err(LadderConfigError::TooFewLimits(self.limits.len()));
        }

        for (index, &value) in self.limits.iter().enumerate() {
            if value <= Decimal::ZERO {
                return Err(LadderConfigError::NonPositiveLimit { index, value });
            }
            if index > 0 {
                let previous = self.limits[index - 1];
                if value >= previous {
                    return Err(LadderConfigError::NotDecreasing {
                        index,
                        value,
                        previous,
                    });
                }
            }
        }

        if self.default_index >= self.limits.len() {
            return Err(LadderConfigError::DefaultIndexOutOfRange {
                index: self.default_index,
                len: self.limits.len(),
            });
        }

        if !(0.0..=1.0).contains(&self.win_rate_threshold) {
            return Err(LadderConfigError::InvalidSetting {
                field: "win_rate_threshold",
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }

        if !self.win_rate_step.is_finite() || self.win_rate_step <= 0.0 {
            return Err(LadderConfigError::InvalidSetting {
                field: "win_rate_step",
                message: "must be positive".to_string(),
            });
        }

        if self.protective_trigger_loss >= Decimal::ZERO {
            return Err(LadderConfigError::InvalidSetting {
                field: "protective_trigger_loss",
                message: "must be negative".to_string(),
            });
        }

        if self.scaling_sensitivity <= Decimal::ZERO {
            return Err(LadderConfigError::InvalidSetting {
                field: "scaling_sensitivity",
                message: "must be positive".to_string(),
            });
        }

        if self.market_stress_multiplier <= Decimal::ZERO
            || self.market_stress_multiplier > Decimal::ONE
        {
            return Err(LadderConfigError::InvalidSetting {
                field: "market_stress_multiplier",
                message: "must be in (0, 1]".to_string(),
            });
        }

        Ok(())
    }
}

fn default_limits() -> Vec<Decimal> {
    vec![
        dec!(1250),
        dec!(800),
        dec!(500),
        dec!(300),
        dec!(200),
        dec!(100),
    ]
}

const fn default_index() -> usize {
    2
}

const fn default_win_rate_threshold() -> f64 {
    0.60
}

const fn default_win_rate_step() -> f64 {
    0.10
}

fn default_protective_trigger_loss() -> Decimal {
    dec!(-75)
}

const fn default_scaling_sensitivity() -> Decimal {
    Decimal::ONE
}

const fn default_confirmation_days() -> u32 {
    2
}

fn default_market_stress_multiplier() -> Decimal {
    dec!(0.5)
}

const fn default_history_len() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RiskLadderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.len(), 6);
        assert_eq!(config.max_index(), 5);
        assert_eq!(config.limits[config.default_index], dec!(500));
    }

    #[test]
    fn non_decreasing_ladder_is_rejected() {
        let config = RiskLadderConfig {
            limits: vec![dec!(500), dec!(500), dec!(100)],
            default_index: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LadderConfigError::NotDecreasing { index: 1, .. })
        ));
    }

    #[test]
    fn increasing_ladder_is_rejected() {
        let config = RiskLadderConfig {
            limits: vec![dec!(100), dec!(200)],
            default_index: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_limit_is_rejected() {
        let config = RiskLadderConfig {
            limits: vec![dec!(100), dec!(0)],
            default_index: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LadderConfigError::NonPositiveLimit { index: 1, .. })
        ));
    }

    #[test]
    fn single_rung_is_rejected() {
        let config = RiskLadderConfig {
            limits: vec![dec!(100)],
            default_index: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(LadderConfigError::TooFewLimits(1)));
    }

    #[test]
    fn default_index_must_be_in_range() {
        let config = RiskLadderConfig {
            default_index: 6,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LadderConfigError::DefaultIndexOutOfRange { index: 6, len: 6 })
        ));
    }

    #[test]
    fn positive_protective_trigger_is_rejected() {
        let config = RiskLadderConfig {
            protective_trigger_loss: dec!(10),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("protective_trigger_loss"));
    }
}
