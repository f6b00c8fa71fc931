//! End-to-end admission: score, size against the ladder, then gate.
//!
//! # Example
//!
//! ```rust,ignore
//! use admission_engine::config::load_config;
//! use admission_engine::gate::RiskLimitValidator;
//! use admission_engine::pipeline::AdmissionPipeline;
//! use std::sync::Arc;
//!
//! let config = load_config(None)?;
//! let primary = Arc::new(RiskLimitValidator::new(config.primary.clone()));
//! let pipeline = AdmissionPipeline::from_config(&config, primary)?;
//!
//! let outcome = pipeline.evaluate(&opportunity, &token).await?;
//! if outcome.admitted {
//!     submit(outcome.contracts);
//! }
//!
//! // After the close
//! pipeline.record_day("acct-1", dec!(-80), today, Some(0.55)).await?;
//! ```

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::AdmissionError;
use crate::gate::{
    PrimaryValidator, ReasonCode, ResilientGate, RiskBudget, TradeCandidate,
    TradeExecutionResult, TradeRequest,
};
use crate::ladder::{
    InMemoryLadderStore, JsonFileLadderStore, LadderBook, LadderStore, MovementResult,
    PositionSizer, SizedPosition,
};
use crate::scoring::{Decision, GoInputs, Regime, ScoreBreakdown, Scorer};

/// One candidate with the signals needed to score it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Owning account.
    pub account_id: String,
    /// Proposed structure; `contracts` is the most the caller wants.
    pub candidate: TradeCandidate,
    /// Scoring signals.
    pub inputs: GoInputs,
    /// Current market regime.
    pub regime: Regime,
    /// Whether market stress sizing applies.
    pub stressed: bool,
    /// Account equity.
    pub account_equity: Decimal,
}

/// Result of [`AdmissionPipeline::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionOutcome {
    /// Whether the trade may be executed.
    pub admitted: bool,
    /// Contracts to execute (zero when not admitted).
    pub contracts: u32,
    /// Reason for the outcome.
    pub reason: ReasonCode,
    /// Score and decision.
    pub score: ScoreBreakdown,
    /// Ladder limit in force, when sizing ran.
    pub risk_limit: Option<Decimal>,
    /// Sizing detail, when sizing ran.
    pub sizing: Option<SizedPosition>,
    /// Gate result, when the gate ran.
    pub execution: Option<TradeExecutionResult>,
}

/// Scorer, ladder book, sizer and gate wired together.
#[derive(Debug)]
pub struct AdmissionPipeline {
    scorer: Scorer,
    ladders: LadderBook,
    sizer: PositionSizer,
    gate: ResilientGate,
}

impl AdmissionPipeline {
    /// Assemble from parts.
    #[must_use]
    pub const fn new(
        scorer: Scorer,
        ladders: LadderBook,
        sizer: PositionSizer,
        gate: ResilientGate,
    ) -> Self {
        Self {
            scorer,
            ladders,
            sizer,
            gate,
        }
    }

    /// Build every component from a loaded configuration.
    pub fn from_config(
        config: &EngineConfig,
        primary: Arc<dyn PrimaryValidator>,
    ) -> Result<Self, AdmissionError> {
        let store: Arc<dyn LadderStore> = if config.persistence.enabled {
            Arc::new(JsonFileLadderStore::new(&config.persistence.ladder_state_path))
        } else {
            Arc::new(InMemoryLadderStore::new())
        };

        let scorer = Scorer::new(config.policy.clone())?;
        let ladders = LadderBook::new(config.ladder.clone(), store)?;
        let sizer = PositionSizer::new(config.ladder.market_stress_multiplier);
        let gate = ResilientGate::new(config.gate_config(), primary);

        tracing::info!(
            policy = %scorer.policy().version,
            rungs = config.ladder.len(),
            persistence = config.persistence.enabled,
            "Admission pipeline ready"
        );

        Ok(Self::new(scorer, ladders, sizer, gate))
    }

    /// The gate, for status and operator actions.
    #[must_use]
    pub const fn gate(&self) -> &ResilientGate {
        &self.gate
    }

    /// The ladder book.
    #[must_use]
    pub const fn ladders(&self) -> &LadderBook {
        &self.ladders
    }

    /// The scorer.
    #[must_use]
    pub const fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Score, size and gate one opportunity.
    ///
    /// # Errors
    ///
    /// Returns an error if the inputs fail validation or the account's
    /// ladder cannot be loaded. Denials are not errors.
    pub async fn evaluate(
        &self,
        opportunity: &Opportunity,
        cancel: &CancellationToken,
    ) -> Result<AdmissionOutcome, AdmissionError> {
        let candidate = &opportunity.candidate;
        let score = self
            .scorer
            .score(&opportunity.inputs, candidate.strategy, opportunity.regime)?;

        if score.decision == Decision::Skip {
            tracing::debug!(
                account_id = %opportunity.account_id,
                final_score = score.final_score,
                "Skipped on score"
            );
            return Ok(AdmissionOutcome {
                admitted: false,
                contracts: 0,
                reason: ReasonCode::ScoreBelowThreshold,
                score,
                risk_limit: None,
                sizing: None,
                execution: None,
            });
        }

        let risk_limit = self.ladders.current_limit(&opportunity.account_id).await?;
        let sizing = self.sizer.size(
            risk_limit,
            score.decision,
            candidate.max_loss_per_contract(),
            opportunity.stressed,
        );
        let contracts = candidate.contracts.min(sizing.contracts);

        if contracts == 0 {
            tracing::debug!(
                account_id = %opportunity.account_id,
                %risk_limit,
                budget = %sizing.budget,
                "Position sizes to zero contracts"
            );
            return Ok(AdmissionOutcome {
                admitted: false,
                contracts: 0,
                reason: ReasonCode::BelowMinimumSize,
                score,
                risk_limit: Some(risk_limit),
                sizing: Some(sizing),
                execution: None,
            });
        }

        let request = TradeRequest {
            account_id: opportunity.account_id.clone(),
            candidate: candidate.with_contracts(contracts),
            budget: RiskBudget {
                risk_limit,
                account_equity: opportunity.account_equity,
            },
        };
        let execution = self.gate.execute_resilient_trade(&request, cancel).await;

        Ok(AdmissionOutcome {
            admitted: execution.executed,
            contracts: if execution.executed { contracts } else { 0 },
            reason: execution.reason,
            score,
            risk_limit: Some(risk_limit),
            sizing: Some(sizing),
            execution: Some(execution),
        })
    }

    /// Apply one trading day's realized results to an account's ladder.
    ///
    /// # Errors
    ///
    /// Returns an error if the date is not after the last processed day or
    /// the checkpoint cannot be written.
    pub async fn record_day(
        &self,
        account_id: &str,
        pnl: Decimal,
        date: NaiveDate,
        win_rate: Option<f64>,
    ) -> Result<MovementResult, AdmissionError> {
        Ok(self
            .ladders
            .process_daily_pnl(account_id, pnl, date, win_rate)
            .await?)
    }
}
