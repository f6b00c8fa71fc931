//! GoScore engine.
//!
//! Converts the seven opportunity signals into a composite 0–100 score
//! using the regime's weight vector, then maps the score onto a
//! Full/Half/Skip decision.
//!
//! # Example
//!
//! ```rust,ignore
//! use admission_engine::scoring::{GoInputs, Policy, Regime, StrategyKind, score};
//!
//! let inputs = GoInputs::new(0.8, 0.1, 0.1, 0.9, 0.9, 0.9, 0.1);
//! let breakdown = score(&inputs, StrategyKind::IronCondor, Regime::Calm, &Policy::default())?;
//! assert_eq!(breakdown.decision, Decision::Full);
//! ```

mod inputs;
mod policy;
mod scorer;

use thiserror::Error;

pub use inputs::{Decision, Factor, GoInputs, Regime, StrategyKind};
pub use policy::{Policy, PolicyError, RegimeWeights, Thresholds};
pub use scorer::{
    FactorContribution, MAX_SCORE, MIN_SCORE, ScoreBreakdown, Scorer, decide, score,
};

/// Errors raised while scoring.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// A signal is non-finite or outside its documented range.
    #[error("invalid input '{field}': {value}")]
    InvalidInput {
        /// Offending field.
        field: &'static str,
        /// Offending value.
        value: f64,
    },

    /// The policy carries no weights for the regime.
    #[error("no weights for regime '{0}'")]
    MissingRegime(Regime),
}
