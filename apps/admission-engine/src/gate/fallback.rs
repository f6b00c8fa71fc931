//! Formula-based fallback validator.
//!
//! Deliberately simple and independent of the primary validator: it runs on
//! every request as a cross-check, and decides alone when the primary is
//! unavailable. Checks run in order and the first failure is reported.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::types::{ReasonCode, TradeRequest, Verdict};

/// Fallback thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Minimum credit / width.
    #[serde(default = "default_min_credit_ratio")]
    pub min_credit_ratio: Decimal,
    /// Maximum credit / width.
    #[serde(default = "default_max_credit_ratio")]
    pub max_credit_ratio: Decimal,
    /// Minimum liquidity score.
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: f64,
    /// Maximum bid/ask spread per share.
    #[serde(default = "default_max_bid_ask_spread")]
    pub max_bid_ask_spread: Decimal,
    /// Maximum max-loss / account equity.
    #[serde(default = "default_max_account_risk_fraction")]
    pub max_account_risk_fraction: Decimal,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            min_credit_ratio: default_min_credit_ratio(),
            max_credit_ratio: default_max_credit_ratio(),
            min_liquidity: default_min_liquidity(),
            max_bid_ask_spread: default_max_bid_ask_spread(),
            max_account_risk_fraction: default_max_account_risk_fraction(),
        }
    }
}

fn default_min_credit_ratio() -> Decimal {
    dec!(0.03)
}

fn default_max_credit_ratio() -> Decimal {
    dec!(0.50)
}

const fn default_min_liquidity() -> f64 {
    0.5
}

fn default_max_bid_ask_spread() -> Decimal {
    dec!(0.10)
}

fn default_max_account_risk_fraction() -> Decimal {
    dec!(0.02)
}

impl FallbackConfig {
    /// Check ranges. Returns a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_credit_ratio < Decimal::ZERO || self.min_credit_ratio >= self.max_credit_ratio {
            return Err(format!(
                "credit ratio band must satisfy 0 <= min < max, got [{}, {}]",
                self.min_credit_ratio, self.max_credit_ratio
            ));
        }
        if self.max_credit_ratio > Decimal::ONE {
            return Err(format!(
                "max_credit_ratio must be <= 1, got {}",
                self.max_credit_ratio
            ));
        }
        if !(0.0..=1.0).contains(&self.min_liquidity) {
            return Err(format!(
                "min_liquidity must be in [0, 1], got {}",
                self.min_liquidity
            ));
        }
        if self.max_bid_ask_spread < Decimal::ZERO {
            return Err("max_bid_ask_spread must not be negative".to_string());
        }
        if self.max_account_risk_fraction <= Decimal::ZERO
            || self.max_account_risk_fraction > Decimal::ONE
        {
            return Err(format!(
                "max_account_risk_fraction must be in (0, 1], got {}",
                self.max_account_risk_fraction
            ));
        }
        Ok(())
    }
}

/// Stateless fallback validator.
#[derive(Debug, Clone, Default)]
pub struct FallbackValidator {
    config: FallbackConfig,
}

impl FallbackValidator {
    /// Validator with `config`.
    #[must_use]
    pub const fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    /// Thresholds in force.
    #[must_use]
    pub const fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Evaluate a request.
    #[must_use]
    pub fn validate(&self, request: &TradeRequest) -> Verdict {
        let candidate = &request.candidate;

        let structure_ok = candidate.contracts > 0
            && candidate.spread_width > Decimal::ZERO
            && candidate.net_credit > Decimal::ZERO
            && candidate.net_credit < candidate.spread_width;
        if !structure_ok {
            return Verdict::deny(Decimal::ZERO, ReasonCode::InvalidStructure);
        }

        let Some(max_loss) = candidate.checked_max_loss() else {
            return Verdict::deny(Decimal::MAX, ReasonCode::InvalidStructure);
        };

        let Some(ratio) = candidate.credit_ratio() else {
            return Verdict::deny(max_loss, ReasonCode::InvalidStructure);
        };
        if ratio < self.config.min_credit_ratio || ratio > self.config.max_credit_ratio {
            return Verdict::deny(max_loss, ReasonCode::CreditRatioOutOfRange);
        }

        if !candidate.liquidity_score.is_finite()
            || candidate.liquidity_score < self.config.min_liquidity
        {
            return Verdict::deny(max_loss, ReasonCode::InsufficientLiquidity);
        }

        if candidate.bid_ask_spread > self.config.max_bid_ask_spread {
            return Verdict::deny(max_loss, ReasonCode::WideBidAsk);
        }

        if max_loss > request.budget.risk_limit {
            return Verdict::deny(max_loss, ReasonCode::ExceedsRiskLimit);
        }

        let equity = request.budget.account_equity;
        let within_account_risk = equity > Decimal::ZERO
            && max_loss
                .checked_div(equity)
                .is_some_and(|fraction| fraction <= self.config.max_account_risk_fraction);
        if !within_account_risk {
            return Verdict::deny(max_loss, ReasonCode::ExceedsAccountRisk);
        }

        Verdict::approve(max_loss)
    }
}
