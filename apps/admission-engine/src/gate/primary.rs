//! Primary validator port.
//!
//! The gate only knows the [`PrimaryValidator`] trait. Implementations may
//! call out to a risk service, a pricing model or anything else that can
//! fail transiently; the gate wraps every call in a circuit breaker and a
//! retry policy.

use async_trait::async_trait;
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{ReasonCode, TradeRequest, Verdict};
use crate::resilience::{ErrorCategory, Retryable};

/// Errors from a primary validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidatorError {
    /// Temporary failure; the call may be retried.
    #[error("transient validator failure: {0}")]
    Transient(String),

    /// Failure that retrying will not fix.
    #[error("permanent validator failure: {0}")]
    Permanent(String),
}

impl Retryable for ValidatorError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Transient(_) => ErrorCategory::Retryable,
            Self::Permanent(_) => ErrorCategory::NonRetryable,
        }
    }
}

/// Primary validation port.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrimaryValidator: Send + Sync {
    /// Validate a request.
    async fn validate(&self, request: &TradeRequest) -> Result<Verdict, ValidatorError>;
}

/// Settings for [`RiskLimitValidator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryConfig {
    /// Earliest time of day (UTC) a trade may be proposed.
    #[serde(default = "default_window_start")]
    pub trading_window_start: NaiveTime,
    /// Latest time of day (UTC) a trade may be proposed.
    #[serde(default = "default_window_end")]
    pub trading_window_end: NaiveTime,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            trading_window_start: default_window_start(),
            trading_window_end: default_window_end(),
        }
    }
}

// 09:30-16:00 US Eastern, expressed in UTC during standard time.
fn default_window_start() -> NaiveTime {
    NaiveTime::from_hms_opt(14, 30, 0).unwrap_or(NaiveTime::MIN)
}

fn default_window_end() -> NaiveTime {
    NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN)
}

impl PrimaryConfig {
    /// Check the window is non-empty.
    pub fn validate(&self) -> Result<(), String> {
        if self.trading_window_start >= self.trading_window_end {
            return Err(format!(
                "trading window start {} must be before end {}",
                self.trading_window_start, self.trading_window_end
            ));
        }
        Ok(())
    }
}

/// Built-in primary validator: positive credit, trading window, and max
/// loss against the ladder limit.
#[derive(Debug, Clone, Default)]
pub struct RiskLimitValidator {
    config: PrimaryConfig,
}

impl RiskLimitValidator {
    /// Validator with `config`.
    #[must_use]
    pub const fn new(config: PrimaryConfig) -> Self {
        Self { config }
    }

    fn check(&self, request: &TradeRequest) -> Verdict {
        let candidate = &request.candidate;
        if candidate.contracts == 0
            || candidate.net_credit <= Decimal::ZERO
            || candidate.spread_width <= candidate.net_credit
        {
            return Verdict::deny(Decimal::ZERO, ReasonCode::InvalidStructure);
        }

        let Some(max_loss) = candidate.checked_max_loss() else {
            return Verdict::deny(Decimal::MAX, ReasonCode::InvalidStructure);
        };

        let time = candidate.proposed_at.time();
        if time < self.config.trading_window_start || time > self.config.trading_window_end {
            return Verdict::deny(max_loss, ReasonCode::OutsideTradingWindow);
        }

        if max_loss > request.budget.risk_limit {
            return Verdict::deny(max_loss, ReasonCode::ExceedsRiskLimit);
        }

        Verdict::approve(max_loss)
    }
}

#[async_trait]
impl PrimaryValidator for RiskLimitValidator {
    async fn validate(&self, request: &TradeRequest) -> Result<Verdict, ValidatorError> {
        Ok(self.check(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::types::{RiskBudget, TradeCandidate};
    use crate::scoring::StrategyKind;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn request_at(hour: u32, minute: u32) -> TradeRequest {
        TradeRequest {
            account_id: "acct".to_string(),
            candidate: TradeCandidate {
                strategy_key: "ic-spx".to_string(),
                strategy: StrategyKind::IronCondor,
                contracts: 1,
                net_credit: dec!(0.30),
                spread_width: dec!(5),
                liquidity_score: 0.9,
                bid_ask_spread: dec!(0.05),
                proposed_at: Utc.with_ymd_and_hms(2025, 3, 3, hour, minute, 0).unwrap(),
            },
            budget: RiskBudget {
                risk_limit: dec!(500),
                account_equity: dec!(50000),
            },
        }
    }

    #[tokio::test]
    async fn approves_inside_window_and_limit() {
        let verdict = RiskLimitValidator::default()
            .validate(&request_at(15, 0))
            .await
            .unwrap();
        assert!(verdict.approved);
        assert_eq!(verdict.max_loss, dec!(470));
    }

    #[tokio::test]
    async fn denies_outside_window() {
        let verdict = RiskLimitValidator::default()
            .validate(&request_at(13, 0))
            .await
            .unwrap();
        assert_eq!(verdict.reason, ReasonCode::OutsideTradingWindow);
    }

    #[tokio::test]
    async fn denies_over_limit() {
        let mut req = request_at(15, 0);
        req.budget.risk_limit = dec!(300);
        let verdict = RiskLimitValidator::default().validate(&req).await.unwrap();
        assert_eq!(verdict.reason, ReasonCode::ExceedsRiskLimit);
    }

    #[tokio::test]
    async fn denies_non_positive_credit() {
        let mut req = request_at(15, 0);
        req.candidate.net_credit = dec!(0);
        let verdict = RiskLimitValidator::default().validate(&req).await.unwrap();
        assert_eq!(verdict.reason, ReasonCode::InvalidStructure);
    }

    #[tokio::test]
    async fn denies_unrepresentable_max_loss() {
        let mut req = request_at(15, 0);
        req.candidate.spread_width = Decimal::MAX;
        let verdict = RiskLimitValidator::default().validate(&req).await.unwrap();
        assert_eq!(verdict.reason, ReasonCode::InvalidStructure);
        assert_eq!(verdict.max_loss, Decimal::MAX);
    }

    #[tokio::test]
    async fn mock_validator_is_a_drop_in() {
        let mut mock = MockPrimaryValidator::new();
        mock.expect_validate()
            .times(1)
            .returning(|_| Err(ValidatorError::Transient("busy".to_string())));
        let err = mock.validate(&request_at(15, 0)).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Retryable);
    }

    #[test]
    fn errors_are_classified() {
        assert_eq!(
            ValidatorError::Permanent("bad".to_string()).category(),
            ErrorCategory::NonRetryable
        );
    }

    #[test]
    fn empty_window_is_rejected() {
        let config = PrimaryConfig {
            trading_window_start: default_window_end(),
            trading_window_end: default_window_start(),
        };
        assert!(config.validate().is_err());
        assert!(PrimaryConfig::default().validate().is_ok());
    }
}
