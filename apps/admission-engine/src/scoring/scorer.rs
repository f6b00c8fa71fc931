//! GoScore computation.

use serde::{Deserialize, Serialize};

use super::ScoringError;
use super::inputs::{Decision, Factor, GoInputs, Regime, StrategyKind};
use super::policy::{Policy, Thresholds};

/// Lowest reportable score.
pub const MIN_SCORE: f64 = 0.0;

/// Highest reportable score.
pub const MAX_SCORE: f64 = 100.0;

/// One factor's weighted contribution to the raw score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    /// Factor scored.
    pub factor: Factor,
    /// Input value.
    pub input: f64,
    /// Weight from the regime table.
    pub weight: f64,
    /// `weight * input`.
    pub contribution: f64,
}

/// Auditable result of scoring one opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Policy version used.
    pub policy_version: String,
    /// Strategy scored.
    pub strategy: StrategyKind,
    /// Regime whose weights were applied.
    pub regime: Regime,
    /// Regime intercept.
    pub intercept: f64,
    /// Score before clamping.
    pub raw_score: f64,
    /// Score clamped to `[0, 100]`.
    pub final_score: f64,
    /// Per-factor contributions, in weight-table order.
    pub contributions: Vec<FactorContribution>,
    /// Thresholds the decision was taken against.
    pub thresholds: Thresholds,
    /// Resulting decision.
    pub decision: Decision,
}

impl ScoreBreakdown {
    /// Contribution of a single factor.
    #[must_use]
    pub fn contribution(&self, factor: Factor) -> Option<f64> {
        self.contributions
            .iter()
            .find(|c| c.factor == factor)
            .map(|c| c.contribution)
    }
}

/// Map a final score onto a decision. Thresholds are inclusive lower bounds.
#[must_use]
pub fn decide(score: f64, thresholds: Thresholds) -> Decision {
    if score >= thresholds.full {
        Decision::Full
    } else if score >= thresholds.half {
        Decision::Half
    } else {
        Decision::Skip
    }
}

/// Score one opportunity.
///
/// Pure: no state, no I/O, safe to call from any number of threads.
pub fn score(
    inputs: &GoInputs,
    strategy: StrategyKind,
    regime: Regime,
    policy: &Policy,
) -> Result<ScoreBreakdown, ScoringError> {
    inputs.validate()?;

    let weights = policy
        .weights
        .get(&regime)
        .ok_or(ScoringError::MissingRegime(regime))?;

    let contributions: Vec<FactorContribution> = Factor::ALL
        .iter()
        .map(|&factor| {
            let input = inputs.get(factor);
            let weight = weights.get(factor);
            FactorContribution {
                factor,
                input,
                weight,
                contribution: weight * input,
            }
        })
        .collect();

    let raw_score = weights.intercept + contributions.iter().map(|c| c.contribution).sum::<f64>();
    let final_score = raw_score.clamp(MIN_SCORE, MAX_SCORE);
    let thresholds = policy.thresholds_for(strategy);
    let decision = decide(final_score, thresholds);

    tracing::debug!(
        policy = %policy.version,
        %strategy,
        %regime,
        raw_score,
        final_score,
        %decision,
        "GoScore computed"
    );

    Ok(ScoreBreakdown {
        policy_version: policy.version.clone(),
        strategy,
        regime,
        intercept: weights.intercept,
        raw_score,
        final_score,
        contributions,
        thresholds,
        decision,
    })
}

/// Stateless scorer bound to one validated policy.
#[derive(Debug, Clone)]
pub struct Scorer {
    policy: Policy,
}

impl Scorer {
    /// Bind a scorer to a policy, validating it first.
    pub fn new(policy: Policy) -> Result<Self, super::PolicyError> {
        Ok(Self {
            policy: policy.validated()?,
        })
    }

    /// The bound policy.
    #[must_use]
    pub const fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Score with the bound policy.
    pub fn score(
        &self,
        inputs: &GoInputs,
        strategy: StrategyKind,
        regime: Regime,
    ) -> Result<ScoreBreakdown, ScoringError> {
        score(inputs, strategy, regime, &self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn scenario_a() -> GoInputs {
        GoInputs::new(0.8, 0.1, 0.1, 0.9, 0.9, 0.9, 0.1)
    }

    #[test]
    fn scenario_a_calm_is_full() {
        let breakdown = score(
            &scenario_a(),
            StrategyKind::IronCondor,
            Regime::Calm,
            &Policy::default(),
        )
        .unwrap();
        assert_eq!(breakdown.decision, Decision::Full);
        assert!((breakdown.final_score - 76.0).abs() < 1e-9);
    }

    #[test]
    fn contributions_sum_to_raw_score() {
        let breakdown = score(
            &scenario_a(),
            StrategyKind::PutCreditSpread,
            Regime::Convex,
            &Policy::default(),
        )
        .unwrap();
        let sum: f64 = breakdown.contributions.iter().map(|c| c.contribution).sum();
        assert!((breakdown.intercept + sum - breakdown.raw_score).abs() < 1e-9);
        assert_eq!(breakdown.contributions.len(), 7);
        assert!((breakdown.contribution(Factor::Poe).unwrap() - 28.0).abs() < 1e-9);
    }

    #[test]
    fn raw_score_above_hundred_is_clamped() {
        let best = GoInputs::new(1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0);
        let breakdown = score(
            &best,
            StrategyKind::IronCondor,
            Regime::Calm,
            &Policy::default(),
        )
        .unwrap();
        assert!(breakdown.raw_score > 100.0);
        assert!((breakdown.final_score - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn raw_score_below_zero_is_clamped() {
        let worst = GoInputs::new(0.0, 1.0, -1.0, 0.0, 0.0, 0.0, 1.0);
        let breakdown = score(
            &worst,
            StrategyKind::IronCondor,
            Regime::Convex,
            &Policy::default(),
        )
        .unwrap();
        assert!(breakdown.raw_score < 0.0);
        assert!(breakdown.final_score.abs() < f64::EPSILON);
        assert_eq!(breakdown.decision, Decision::Skip);
    }

    #[test]
    fn invalid_input_is_an_error_not_a_clamp() {
        let bad = GoInputs {
            poe: 1.5,
            ..scenario_a()
        };
        let result = score(
            &bad,
            StrategyKind::IronCondor,
            Regime::Calm,
            &Policy::default(),
        );
        assert!(matches!(
            result,
            Err(ScoringError::InvalidInput { field: "poe", .. })
        ));
    }

    #[test]
    fn strategy_override_changes_decision() {
        let mut policy = Policy::default();
        policy.strategy_thresholds.insert(
            StrategyKind::BrokenWingButterfly,
            Thresholds {
                full: 80.0,
                half: 60.0,
            },
        );
        let breakdown = score(
            &scenario_a(),
            StrategyKind::BrokenWingButterfly,
            Regime::Calm,
            &policy,
        )
        .unwrap();
        assert_eq!(breakdown.decision, Decision::Half);
    }

    #[test]
    fn scorer_rejects_invalid_policy() {
        let mut policy = Policy::default();
        policy.weights.clear();
        assert!(Scorer::new(policy).is_err());
    }

    #[test_case(100.0 => Decision::Full ; "maximum")]
    #[test_case(70.0 => Decision::Full ; "full threshold inclusive")]
    #[test_case(69.999 => Decision::Half ; "just below full")]
    #[test_case(55.0 => Decision::Half ; "half threshold inclusive")]
    #[test_case(54.999 => Decision::Skip ; "just below half")]
    #[test_case(0.0 => Decision::Skip ; "minimum")]
    fn decision_thresholds(score: f64) -> Decision {
        decide(score, Thresholds::default())
    }

    fn unit() -> impl Strategy<Value = f64> {
        0.0..=1.0f64
    }

    fn regime() -> impl Strategy<Value = Regime> {
        prop_oneof![Just(Regime::Calm), Just(Regime::Mixed), Just(Regime::Convex)]
    }

    proptest! {
        #[test]
        fn final_score_is_bounded(
            poe in unit(), pot in unit(), edge in -1.0..=1.0f64, liq in unit(),
            reg in unit(), pin in unit(), util in unit(), regime in regime(),
        ) {
            let inputs = GoInputs::new(poe, pot, edge, liq, reg, pin, util);
            let breakdown = score(&inputs, StrategyKind::IronCondor, regime, &Policy::default()).unwrap();
            prop_assert!((MIN_SCORE..=MAX_SCORE).contains(&breakdown.final_score));
        }

        #[test]
        fn decision_is_monotonic_in_score(a in 0.0..=100.0f64, b in 0.0..=100.0f64) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let rank = |d: Decision| match d {
                Decision::Skip => 0,
                Decision::Half => 1,
                Decision::Full => 2,
            };
            let thresholds = Thresholds::default();
            prop_assert!(rank(decide(lo, thresholds)) <= rank(decide(hi, thresholds)));
        }
    }
}
