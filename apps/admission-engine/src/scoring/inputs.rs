//! Scoring inputs and the enumerations that select weight tables.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::ScoringError;

/// Market-condition classification that selects a weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    /// Low realized volatility, range-bound session.
    Calm,
    /// Neither calm nor convex.
    Mixed,
    /// Trending or gapping session with convex payoff risk.
    Convex,
}

impl Regime {
    /// Every regime a policy must carry weights for.
    pub const ALL: [Self; 3] = [Self::Calm, Self::Mixed, Self::Convex];
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calm => write!(f, "calm"),
            Self::Mixed => write!(f, "mixed"),
            Self::Convex => write!(f, "convex"),
        }
    }
}

/// Proposed options structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Short put spread plus short call spread.
    IronCondor,
    /// Bull put credit spread.
    PutCreditSpread,
    /// Bear call credit spread.
    CallCreditSpread,
    /// Butterfly with an extended protective wing.
    BrokenWingButterfly,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IronCondor => write!(f, "iron_condor"),
            Self::PutCreditSpread => write!(f, "put_credit_spread"),
            Self::CallCreditSpread => write!(f, "call_credit_spread"),
            Self::BrokenWingButterfly => write!(f, "broken_wing_butterfly"),
        }
    }
}

/// Admission decision derived from the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Trade at the full ladder budget.
    Full,
    /// Trade at half the ladder budget.
    Half,
    /// Do not trade.
    Skip,
}

impl Decision {
    /// Fraction of the ladder budget this decision allocates.
    #[must_use]
    pub fn size_fraction(self) -> Decimal {
        match self {
            Self::Full => Decimal::ONE,
            Self::Half => dec!(0.5),
            Self::Skip => Decimal::ZERO,
        }
    }

    /// Whether the decision admits the trade at any size.
    #[must_use]
    pub const fn is_tradeable(self) -> bool {
        !matches!(self, Self::Skip)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "FULL"),
            Self::Half => write!(f, "HALF"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// Scoring factor identifiers, in weight-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    /// Probability of edge.
    Poe,
    /// Probability of touch.
    Pot,
    /// Signed edge.
    Edge,
    /// Liquidity score.
    Liquidity,
    /// Regime-fit score.
    RegimeFit,
    /// Pin-risk score.
    Pin,
    /// Risk-budget utilization.
    RfibUtil,
}

impl Factor {
    /// All factors in weight-table order.
    pub const ALL: [Self; 7] = [
        Self::Poe,
        Self::Pot,
        Self::Edge,
        Self::Liquidity,
        Self::RegimeFit,
        Self::Pin,
        Self::RfibUtil,
    ];

    /// Field name used in error messages and audit output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Poe => "poe",
            Self::Pot => "pot",
            Self::Edge => "edge",
            Self::Liquidity => "liquidity",
            Self::RegimeFit => "regime_fit",
            Self::Pin => "pin",
            Self::RfibUtil => "rfib_util",
        }
    }

    /// Inclusive valid range for the factor's input.
    #[must_use]
    pub const fn bounds(self) -> (f64, f64) {
        match self {
            Self::Edge => (-1.0, 1.0),
            _ => (0.0, 1.0),
        }
    }
}

/// The seven bounded signals scored for one opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoInputs {
    /// Probability of edge, `[0, 1]`.
    pub poe: f64,
    /// Probability of touch, `[0, 1]`.
    pub pot: f64,
    /// Signed edge, `[-1, 1]`.
    pub edge: f64,
    /// Liquidity score, `[0, 1]`.
    pub liquidity: f64,
    /// Regime-fit score, `[0, 1]`.
    pub regime_fit: f64,
    /// Pin-risk score, `[0, 1]` (higher is safer).
    pub pin: f64,
    /// Risk-budget utilization, `[0, 1]`.
    pub rfib_util: f64,
}

impl GoInputs {
    /// Build inputs in weight-table order.
    #[must_use]
    pub const fn new(
        poe: f64,
        pot: f64,
        edge: f64,
        liquidity: f64,
        regime_fit: f64,
        pin: f64,
        rfib_util: f64,
    ) -> Self {
        Self {
            poe,
            pot,
            edge,
            liquidity,
            regime_fit,
            pin,
            rfib_util,
        }
    }

    /// Value of one factor.
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

    /// Reject non-finite or out-of-range signals.
    ///
    /// Values are never clamped: a bad input means the producer is wrong.
    pub fn validate(&self) -> Result<(), ScoringError> {
        for factor in Factor::ALL {
            let value = self.get(factor);
            let (lo, hi) = factor.bounds();
            if !value.is_finite() || value < lo || value > hi {
                return Err(ScoringError::InvalidInput {
                    field: factor.name(),
                    value,
                });
            }
        }
        Ok(())
    }
}
