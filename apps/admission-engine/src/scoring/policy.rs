//! Versioned scoring policy: thresholds and per-regime weight tables.
//!
//! A policy is validated once when it is loaded and is immutable after
//! that. Every [`Regime`] must carry a weight vector, so adding a regime is
//! a data change in the policy document rather than a new code branch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::inputs::{Factor, Regime, StrategyKind};

/// Policy validation failures. All of these abort startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// Policy version string is empty.
    #[error("policy version must not be empty")]
    MissingVersion,

    /// Thresholds are not `0 <= half < full <= 100`.
    #[error("invalid thresholds for {scope}: half={half}, full={full} (need 0 <= half < full <= 100)")]
    InvalidThresholds {
        /// Where the thresholds were declared.
        scope: String,
        /// Half threshold.
        half: f64,
        /// Full threshold.
        full: f64,
    },

    /// A regime has no weight vector.
    #[error("policy has no weights for regime '{0}'")]
    MissingRegime(Regime),

    /// A weight is NaN or infinite.
    #[error("non-finite weight for {regime}.{factor}")]
    NonFiniteWeight {
        /// Regime owning the weight.
        regime: Regime,
        /// Factor name (or `intercept`).
        factor: &'static str,
    },
}

/// Inclusive lower bounds for the Full and Half decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Score at or above which the decision is Full.
    pub full: f64,
    /// Score at or above which the decision is Half.
    pub half: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            full: 70.0,
            half: 55.0,
        }
    }
}

impl Thresholds {
    fn validate(&self, scope: &str) -> Result<(), PolicyError> {
        let ordered = self.half.is_finite()
            && self.full.is_finite()
            && self.half >= 0.0
            && self.half < self.full
            && self.full <= 100.0;
        if ordered {
            Ok(())
        } else {
            Err(PolicyError::InvalidThresholds {
                scope: scope.to_string(),
                half: self.half,
                full: self.full,
            })
        }
    }
}

/// Weight vector for one regime, in score points per unit of input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeWeights {
    /// Constant term added before clamping.
    #[serde(default)]
    pub intercept: f64,
    /// Probability-of-edge weight.
    pub poe: f64,
    /// Probability-of-touch weight (normally negative).
    pub pot: f64,
    /// Edge weight.
    pub edge: f64,
    /// Liquidity weight.
    pub liquidity: f64,
    /// Regime-fit weight.
    pub regime_fit: f64,
    /// Pin-risk weight.
    pub pin: f64,
    /// Risk-budget utilization weight (normally negative).
    pub rfib_util: f64,
}

impl RegimeWeights {
    /// Weight applied to one factor.
    #[must_use]
    pub const fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Poe => self.poe,
            Factor::Pot => self.pot,
            Factor::Edge => self.edge,
            Factor::Liquidity => self.liquidity,
            Factor::RegimeFit => self.regime_fit,
            Factor::Pin => self.pin,
            Factor::RfibUtil => self.rfib_util,
        }
    }

    fn validate(&self, regime: Regime) -> Result<(), PolicyError> {
        if !self.intercept.is_finite() {
            return Err(PolicyError::NonFiniteWeight {
                regime,
                factor: "intercept",
            });
        }
        for factor in Factor::ALL {
            if !self.get(factor).is_finite() {
                return Err(PolicyError::NonFiniteWeight {
                    regime,
                    factor: factor.name(),
                });
            }
        }
        Ok(())
    }
}

/// Scoring policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Version tag recorded on every score breakdown.
    pub version: String,
    /// Global decision thresholds.
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Weight table per regime.
    pub weights: HashMap<Regime, RegimeWeights>,
    /// Optional per-strategy threshold overrides.
    #[serde(default)]
    pub strategy_thresholds: HashMap<StrategyKind, Thresholds>,
}

impl Default for Policy {
    fn default() -> Self {
        let weights = HashMap::from([
            (
                Regime::Calm,
                RegimeWeights {
                    intercept: 10.0,
                    poe: 40.0,
                    pot: -20.0,
                    edge: 20.0,
                    liquidity: 15.0,
                    regime_fit: 15.0,
                    pin: 10.0,
                    rfib_util: -20.0,
                },
            ),
            (
                Regime::Mixed,
                RegimeWeights {
                    intercept: 5.0,
                    poe: 40.0,
                    pot: -25.0,
                    edge: 20.0,
                    liquidity: 15.0,
                    regime_fit: 15.0,
                    pin: 10.0,
                    rfib_util: -25.0,
                },
            ),
            (
                Regime::Convex,
                RegimeWeights {
                    intercept: 0.0,
                    poe: 35.0,
                    pot: -30.0,
                    edge: 25.0,
                    liquidity: 15.0,
                    regime_fit: 20.0,
                    pin: 15.0,
                    rfib_util: -30.0,
                },
            ),
        ]);

        Self {
            version: "goscore-v1".to_string(),
            thresholds: Thresholds::default(),
            weights,
            strategy_thresholds: HashMap::new(),
        }
    }
}

impl Policy {
    /// Validate and return the policy, consuming it.
    pub fn validated(self) -> Result<Self, PolicyError> {
        self.validate()?;
        Ok(self)
    }

    /// Check thresholds, weight completeness and weight finiteness.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.version.trim().is_empty() {
            return Err(PolicyError::MissingVersion);
        }

        self.thresholds.validate("policy")?;

        for (strategy, thresholds) in &self.strategy_thresholds {
            thresholds.validate(&format!("strategy '{strategy}'"))?;
        }

        for regime in Regime::ALL {
            let weights = self
                .weights
                .get(&regime)
                .ok_or(PolicyError::MissingRegime(regime))?;
            weights.validate(regime)?;
        }

        Ok(())
    }

    /// Thresholds in force for a strategy.
    #[must_use]
    pub fn thresholds_for(&self, strategy: StrategyKind) -> Thresholds {
        self.strategy_thresholds
            .get(&strategy)
            .copied()
            .unwrap_or(self.thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_valid() {
        assert!(Policy::default().validate().is_ok());
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let policy = Policy {
            thresholds: Thresholds {
                full: 50.0,
                half: 60.0,
            },
            ..Policy::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::InvalidThresholds { .. })
        ));
    }

    #[test]
    fn equal_thresholds_are_rejected() {
        let policy = Policy {
            thresholds: Thresholds {
                full: 60.0,
                half: 60.0,
            },
            ..Policy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn missing_regime_is_rejected() {
        let mut policy = Policy::default();
        policy.weights.remove(&Regime::Convex);
        assert_eq!(
            policy.validate(),
            Err(PolicyError::MissingRegime(Regime::Convex))
        );
    }

    #[test]
    fn non_finite_weight_is_rejected() {
        let mut policy = Policy::default();
        if let Some(w) = policy.weights.get_mut(&Regime::Mixed) {
            w.edge = f64::INFINITY;
        }
        assert_eq!(
            policy.validate(),
            Err(PolicyError::NonFiniteWeight {
                regime: Regime::Mixed,
                factor: "edge"
            })
        );
    }

    #[test]
    fn bad_strategy_override_is_rejected() {
        let mut policy = Policy::default();
        policy.strategy_thresholds.insert(
            StrategyKind::IronCondor,
            Thresholds {
                full: 120.0,
                half: 60.0,
            },
        );
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("iron_condor"));
    }

    #[test]
    fn strategy_override_takes_precedence() {
        let mut policy = Policy::default();
        let tight = Thresholds {
            full: 80.0,
            half: 65.0,
        };
        policy
            .strategy_thresholds
            .insert(StrategyKind::BrokenWingButterfly, tight);
        assert_eq!(
            policy.thresholds_for(StrategyKind::BrokenWingButterfly),
            tight
        );
        assert_eq!(
            policy.thresholds_for(StrategyKind::IronCondor),
            Thresholds::default()
        );
    }

    #[test]
    fn policy_parses_from_yaml() {
        let yaml = r"
version: goscore-test
thresholds:
  full: 72
  half: 50
weights:
  calm: { poe: 40, pot: -20, edge: 20, liquidity: 15, regime_fit: 15, pin: 10, rfib_util: -20 }
  mixed: { intercept: 5, poe: 40, pot: -25, edge: 20, liquidity: 15, regime_fit: 15, pin: 10, rfib_util: -25 }
  convex: { poe: 35, pot: -30, edge: 25, liquidity: 15, regime_fit: 20, pin: 15, rfib_util: -30 }
";
        let policy: Policy = serde_yaml_bw::from_str(yaml).unwrap();
        let policy = policy.validated().unwrap();
        assert_eq!(policy.version, "goscore-test");
        assert!((policy.thresholds.full - 72.0).abs() < f64::EPSILON);
        assert!((policy.weights[&Regime::Calm].intercept).abs() < f64::EPSILON);
    }
}
