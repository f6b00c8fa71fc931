//! Gate request and result types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ladder::{checked_max_loss_per_contract, max_loss_per_contract};
use crate::resilience::{CircuitBreakerMetrics, CircuitBreakerState, HealthReport};
use crate::scoring::StrategyKind;

/// Machine-readable reason attached to every verdict and result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Every check passed.
    Approved,
    /// Contracts, width or credit are not a valid credit spread.
    InvalidStructure,
    /// Credit-to-width ratio outside the allowed band.
    CreditRatioOutOfRange,
    /// Liquidity score too low.
    InsufficientLiquidity,
    /// Bid/ask spread too wide.
    WideBidAsk,
    /// Max loss above the per-trade risk limit.
    ExceedsRiskLimit,
    /// Max loss too large a fraction of account equity.
    ExceedsAccountRisk,
    /// Proposed outside the trading window.
    OutsideTradingWindow,
    /// Primary approved but the fallback denied.
    FallbackRejected,
    /// Fallback approved but the primary denied.
    PrimaryRejected,
    /// Strategy key is in emergency mode.
    EmergencyMode,
    /// Score below the Half threshold.
    ScoreBelowThreshold,
    /// Sized position rounds to zero contracts.
    BelowMinimumSize,
}

impl ReasonCode {
    /// Wire name, as serialized.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::InvalidStructure => "INVALID_STRUCTURE",
            Self::CreditRatioOutOfRange => "CREDIT_RATIO_OUT_OF_RANGE",
            Self::InsufficientLiquidity => "INSUFFICIENT_LIQUIDITY",
            Self::WideBidAsk => "WIDE_BID_ASK",
            Self::ExceedsRiskLimit => "EXCEEDS_RISK_LIMIT",
            Self::ExceedsAccountRisk => "EXCEEDS_ACCOUNT_RISK",
            Self::OutsideTradingWindow => "OUTSIDE_TRADING_WINDOW",
            Self::FallbackRejected => "FALLBACK_REJECTED",
            Self::PrimaryRejected => "PRIMARY_REJECTED",
            Self::EmergencyMode => "EMERGENCY_MODE",
            Self::ScoreBelowThreshold => "SCORE_BELOW_THRESHOLD",
            Self::BelowMinimumSize => "BELOW_MINIMUM_SIZE",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed vertical credit structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCandidate {
    /// Key that breakers and emergency mode are tracked under.
    pub strategy_key: String,
    /// Structure type.
    pub strategy: StrategyKind,
    /// Contracts proposed.
    pub contracts: u32,
    /// Net credit per share.
    pub net_credit: Decimal,
    /// Strike width per share.
    pub spread_width: Decimal,
    /// Liquidity score in `[0, 1]`.
    pub liquidity_score: f64,
    /// Quoted bid/ask spread per share.
    pub bid_ask_spread: Decimal,
    /// When execution is proposed.
    pub proposed_at: DateTime<Utc>,
}

impl TradeCandidate {
    /// Worst-case loss of one contract.
    #[must_use]
    pub fn max_loss_per_contract(&self) -> Decimal {
        max_loss_per_contract(self.spread_width, self.net_credit)
    }

    /// Worst-case loss of the whole position, or `None` on overflow.
    #[must_use]
    pub fn checked_max_loss(&self) -> Option<Decimal> {
        checked_max_loss_per_contract(self.spread_width, self.net_credit)?
            .checked_mul(Decimal::from(self.contracts))
    }

    /// Worst-case loss of the whole position. Saturates at `Decimal::MAX`.
    #[must_use]
    pub fn max_loss(&self) -> Decimal {
        self.checked_max_loss().unwrap_or(Decimal::MAX)
    }

    /// Credit as a fraction of width, if the width is positive and the
    /// ratio is representable.
    #[must_use]
    pub fn credit_ratio(&self) -> Option<Decimal> {
        if self.spread_width <= Decimal::ZERO {
            return None;
        }
        self.net_credit.checked_div(self.spread_width)
    }

    /// Copy with a different contract count.
    #[must_use]
    pub fn with_contracts(&self, contracts: u32) -> Self {
        Self {
            contracts,
            ..self.clone()
        }
    }
}

/// Ladder-derived budget the validators check against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskBudget {
    /// Per-trade risk limit from the account's ladder.
    pub risk_limit: Decimal,
    /// Account equity.
    pub account_equity: Decimal,
}

/// One admission request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    /// Owning account.
    pub account_id: String,
    /// Candidate under review.
    pub candidate: TradeCandidate,
    /// Budget to validate against.
    pub budget: RiskBudget,
}

/// A single validator's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether this validator approves.
    pub approved: bool,
    /// Max loss computed by this validator.
    pub max_loss: Decimal,
    /// Reason for the answer.
    pub reason: ReasonCode,
}

impl Verdict {
    /// Approving verdict.
    #[must_use]
    pub const fn approve(max_loss: Decimal) -> Self {
        Self {
            approved: true,
            max_loss,
            reason: ReasonCode::Approved,
        }
    }

    /// Denying verdict.
    #[must_use]
    pub const fn deny(max_loss: Decimal, reason: ReasonCode) -> Self {
        Self {
            approved: false,
            max_loss,
            reason,
        }
    }
}

/// Validator that contributed to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationMethod {
    /// Primary validator.
    Primary,
    /// Formula-based fallback.
    Fallback,
}

/// Combined validation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Final answer.
    pub approved: bool,
    /// Max loss at entry.
    pub max_loss: Decimal,
    /// Reason for the answer.
    pub reason: ReasonCode,
    /// Validators whose verdict concurred with the final answer.
    pub methods: Vec<ValidationMethod>,
    /// Primary was unavailable and the fallback decided alone.
    pub degraded: bool,
    /// Primary's verdict, if it answered.
    pub primary_verdict: Option<Verdict>,
    /// Fallback's verdict (always computed).
    pub fallback_verdict: Verdict,
}

/// Outcome of [`crate::gate::ResilientGate::execute_resilient_trade`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeExecutionResult {
    /// Trace id for this request.
    pub operation_id: Uuid,
    /// The gate reached a decision with the primary validator available.
    /// False when degraded or blocked by emergency mode.
    pub success: bool,
    /// The trade is admitted for execution.
    pub executed: bool,
    /// Reason for the decision.
    pub reason: ReasonCode,
    /// Validation detail (absent when blocked by emergency mode).
    pub validation: Option<ValidationResult>,
    /// Breaker state for the strategy key after the call.
    pub circuit_state: CircuitBreakerState,
    /// Whether the strategy key is in emergency mode after the call.
    pub emergency_mode: bool,
    /// Whether the fallback decided alone.
    pub degraded: bool,
    /// Wall time spent in the gate.
    pub elapsed_ms: u64,
}

/// Emergency mode state for one strategy key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyStatus {
    /// Strategy key.
    pub strategy_key: String,
    /// Current run of primary failures.
    pub consecutive_failures: u32,
    /// Whether trading is blocked for the key.
    pub active: bool,
    /// When emergency mode was entered.
    pub entered_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the gate's resilience state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Aggregate health.
    pub health: HealthReport,
    /// Every breaker.
    pub circuits: Vec<CircuitBreakerMetrics>,
    /// Every tracked strategy key.
    pub emergency: Vec<EmergencyStatus>,
    /// Requests handled.
    pub total_requests: u64,
    /// Requests approved.
    pub total_approved: u64,
    /// Requests denied.
    pub total_denied: u64,
}
