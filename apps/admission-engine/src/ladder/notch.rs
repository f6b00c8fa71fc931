//! RevFibNotch state machine.
//!
//! The notch is an index into [`RiskLadderConfig::limits`]. Once per trading
//! day the realized P&L (and optionally the day's win rate) moves the
//! notch toward the conservative end on adverse days and, after a run of
//! confirming days, one rung back toward the aggressive end.
//!
//! ```text
//! pnl <= protective_trigger_loss  → +max(2, loss notches)     (short-circuits)
//! win_rate < threshold            → +(1 + deficit / step)
//! pnl < 0                         → +max(1, |pnl| / 100 * sensitivity)
//! pnl > 0, confirmed              → -1
//! ```
//!
//! Positive movement is toward the conservative end (index increases).

use std::collections::VecDeque;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::{LadderConfigError, RiskLadderConfig};
use super::store::LadderCheckpoint;

/// Slack added before flooring the win-rate deficit so that an exact
/// multiple of the step is not lost to binary rounding.
const WIN_RATE_EPSILON: f64 = 1e-9;

/// Ladder processing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    /// A day was submitted at or before the last processed day.
    #[error("day {date} is not after last processed day {last_processed}")]
    OutOfOrder {
        /// Submitted day.
        date: NaiveDate,
        /// Last day already applied.
        last_processed: NaiveDate,
    },
}

/// Why the notch moved (or did not).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementReason {
    /// Daily loss at or beyond the protective trigger.
    ProtectiveTrigger,
    /// Win rate strictly below threshold.
    WinRateProtection,
    /// Ordinary losing day.
    LossDriven,
    /// Profitable day completing the confirmation run.
    ProfitConfirmed,
    /// Profitable day still inside the confirmation run.
    AwaitingConfirmation,
    /// Flat day with no adverse signal.
    Neutral,
    /// Operator override.
    ManualReset {
        /// Operator-supplied reason.
        reason: String,
    },
    /// State resumed from a checkpoint.
    Restored,
}

impl MovementReason {
    /// Whether this reason counts as an adverse day.
    #[must_use]
    pub const fn is_adverse(&self) -> bool {
        matches!(
            self,
            Self::ProtectiveTrigger | Self::WinRateProtection | Self::LossDriven
        )
    }
}

impl std::fmt::Display for MovementReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProtectiveTrigger => write!(f, "PROTECTIVE_TRIGGER"),
            Self::WinRateProtection => write!(f, "WIN_RATE_PROTECTION"),
            Self::LossDriven => write!(f, "LOSS_DRIVEN"),
            Self::ProfitConfirmed => write!(f, "PROFIT_CONFIRMED"),
            Self::AwaitingConfirmation => write!(f, "AWAITING_CONFIRMATION"),
            Self::Neutral => write!(f, "NEUTRAL"),
            Self::ManualReset { reason } => write!(f, "MANUAL_RESET({reason})"),
            Self::Restored => write!(f, "RESTORED"),
        }
    }
}

/// One processed trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyOutcome {
    /// Trading day.
    pub date: NaiveDate,
    /// Realized P&L.
    pub pnl: Decimal,
    /// Win rate supplied with the day, if any.
    pub win_rate: Option<f64>,
    /// Index after the day was applied.
    pub index_after: usize,
    /// Signed requested movement.
    pub movement: i32,
    /// Rule that decided the movement.
    pub reason: MovementReason,
}

/// Mutable ladder state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLadderState {
    /// Current notch index.
    pub index: usize,
    /// Consecutive days without an adverse signal.
    pub consecutive_non_adverse_days: u32,
    /// Most recent daily outcomes, oldest first.
    pub history: VecDeque<DailyOutcome>,
    /// Reason for the last state change.
    pub last_reason: Option<MovementReason>,
    /// Last day applied.
    pub last_processed_date: Option<NaiveDate>,
}

/// Result of one ladder update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementResult {
    /// Trading day (`None` for manual resets).
    pub date: Option<NaiveDate>,
    /// Index before the update.
    pub previous_index: usize,
    /// Index after the update.
    pub new_index: usize,
    /// Signed movement the rules asked for, before clamping.
    pub notch_movement: i32,
    /// Signed movement actually applied after clamping.
    pub applied_movement: i32,
    /// Limit before the update.
    pub previous_limit: Decimal,
    /// Limit after the update.
    pub new_limit: Decimal,
    /// Rule that decided the movement.
    pub reason: MovementReason,
    /// Confirmation counter after the update.
    pub consecutive_non_adverse_days: u32,
}

/// Adaptive capital-at-risk ladder for one account.
#[derive(Debug, Clone)]
pub struct RiskLadder {
    config: RiskLadderConfig,
    state: RiskLadderState,
}

impl RiskLadder {
    /// Create a ladder at the configured default index.
    pub fn new(config: RiskLadderConfig) -> Result<Self, LadderConfigError> {
        let config = config.validated()?;
        let state = RiskLadderState {
            index: config.default_index,
            consecutive_non_adverse_days: 0,
            history: VecDeque::with_capacity(config.history_len),
            last_reason: None,
            last_processed_date: None,
        };
        Ok(Self { config, state })
    }

    /// Resume a ladder from a checkpoint. The stored index is clamped.
    pub fn restore(
        config: RiskLadderConfig,
        checkpoint: &LadderCheckpoint,
    ) -> Result<Self, LadderConfigError> {
        let mut ladder = Self::new(config)?;
        ladder.state.index = ladder.clamp_index(checkpoint.index as i64);
        ladder.state.consecutive_non_adverse_days = checkpoint.consecutive_non_adverse_days;
        ladder.state.last_processed_date = checkpoint.last_processed_date;
        ladder.state.last_reason = Some(MovementReason::Restored);
        Ok(ladder)
    }

    /// Current notch index.
    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.state.index
    }

    /// Risk limit at the current notch.
    #[must_use]
    pub fn current_limit(&self) -> Decimal {
        self.limit_at(self.state.index)
    }

    /// Read-only view of the state.
    #[must_use]
    pub const fn state(&self) -> &RiskLadderState {
        &self.state
    }

    /// Ladder configuration.
    #[must_use]
    pub const fn config(&self) -> &RiskLadderConfig {
        &self.config
    }

    /// Durable projection of the state.
    #[must_use]
    pub fn checkpoint(&self, account_id: &str) -> LadderCheckpoint {
        LadderCheckpoint {
            account_id: account_id.to_string(),
            index: self.state.index,
            consecutive_non_adverse_days: self.state.consecutive_non_adverse_days,
            last_processed_date: self.state.last_processed_date,
            updated_at: Utc::now(),
        }
    }

    /// Apply one trading day.
    ///
    /// Days must arrive in strictly increasing date order; anything else is
    /// rejected without touching state.
    pub fn process_daily_pnl(
        &mut self,
        pnl: Decimal,
        date: NaiveDate,
        win_rate: Option<f64>,
    ) -> Result<MovementResult, LadderError> {
        if let Some(last_processed) = self.state.last_processed_date
            && date <= last_processed
        {
            return Err(LadderError::OutOfOrder {
                date,
                last_processed,
            });
        }

        let (movement, reason) = self.evaluate(pnl, win_rate);

        if reason.is_adverse() {
            self.state.consecutive_non_adverse_days = 0;
        } else if reason == MovementReason::ProfitConfirmed {
            self.state.consecutive_non_adverse_days = 0;
        } else {
            self.state.consecutive_non_adverse_days =
                self.state.consecutive_non_adverse_days.saturating_add(1);
        }

        let result = self.apply(movement, reason.clone(), Some(date));
        self.state.last_processed_date = Some(date);
        self.push_history(DailyOutcome {
            date,
            pnl,
            win_rate,
            index_after: result.new_index,
            movement,
            reason,
        });

        if result.reason == MovementReason::ProtectiveTrigger {
            tracing::warn!(
                %date,
                %pnl,
                from = result.previous_index,
                to = result.new_index,
                new_limit = %result.new_limit,
                "Protective trigger fired"
            );
        } else {
            tracing::info!(
                %date,
                %pnl,
                win_rate,
                from = result.previous_index,
                to = result.new_index,
                reason = %result.reason,
                confirmation = result.consecutive_non_adverse_days,
                "Ladder day processed"
            );
        }

        Ok(result)
    }

    /// Force the notch to `index` (clamped) and restart confirmation.
    pub fn reset_to_notch(&mut self, index: usize, reason: impl Into<String>) -> MovementResult {
        let reason = reason.into();
        let target = self.clamp_index(i64::try_from(index).unwrap_or(i64::MAX));
        let movement = target as i64 - self.state.index as i64;
        self.state.consecutive_non_adverse_days = 0;

        let result = self.apply(
            i32::try_from(movement).unwrap_or(i32::MAX),
            MovementReason::ManualReset {
                reason: reason.clone(),
            },
            None,
        );

        tracing::warn!(
            from = result.previous_index,
            to = result.new_index,
            %reason,
            "Ladder manually reset"
        );

        result
    }

    /// Decide the signed movement and reason for one day without mutating.
    pub(crate) fn evaluate(&self, pnl: Decimal, win_rate: Option<f64>) -> (i32, MovementReason) {
        if pnl <= self.config.protective_trigger_loss {
            return (
                self.loss_notches(pnl).max(2),
                MovementReason::ProtectiveTrigger,
            );
        }

        let win_rate_move = win_rate.and_then(|wr| self.win_rate_notches(wr));
        let loss_move = (pnl < Decimal::ZERO).then(|| self.loss_notches(pnl));

        match (win_rate_move, loss_move) {
            (Some(w), Some(l)) if l > w => (l, MovementReason::LossDriven),
            (Some(w), _) => (w, MovementReason::WinRateProtection),
            (None, Some(l)) => (l, MovementReason::LossDriven),
            (None, None) => self.evaluate_non_adverse(pnl),
        }
    }

    fn evaluate_non_adverse(&self, pnl: Decimal) -> (i32, MovementReason) {
        if pnl <= Decimal::ZERO {
            return (0, MovementReason::Neutral);
        }
        // Today counts toward the run.
        let run = self.state.consecutive_non_adverse_days.saturating_add(1);
        if run >= self.config.confirmation_days {
            (-1, MovementReason::ProfitConfirmed)
        } else {
            (0, MovementReason::AwaitingConfirmation)
        }
    }

    /// `max(1, floor(|pnl| / 100 * sensitivity))`, capped at the ladder length.
    /// Overflow saturates to the cap.
    pub(crate) fn loss_notches(&self, pnl: Decimal) -> i32 {
        let cap = self.config.len() as i64;
        let notches = (pnl.abs() / Decimal::ONE_HUNDRED)
            .checked_mul(self.config.scaling_sensitivity)
            .and_then(|scaled| scaled.floor().to_i64())
            .unwrap_or(cap)
            .clamp(1, cap.max(1));
        i32::try_from(notches).unwrap_or(i32::MAX)
    }

    /// Protective notches for a win rate, or `None` when not strictly below
    /// the threshold. Non-finite rates are ignored.
    pub(crate) fn win_rate_notches(&self, win_rate: f64) -> Option<i32> {
        if !win_rate.is_finite() {
            return None;
        }
        let win_rate = win_rate.clamp(0.0, 1.0);
        if win_rate >= self.config.win_rate_threshold {
            return None;
        }
        let deficit = self.config.win_rate_threshold - win_rate;
        let extra = (deficit / self.config.win_rate_step + WIN_RATE_EPSILON).floor() as i32;
        let cap = i32::try_from(self.config.len()).unwrap_or(i32::MAX);
        Some((1 + extra).min(cap))
    }

    fn apply(
        &mut self,
        movement: i32,
        reason: MovementReason,
        date: Option<NaiveDate>,
    ) -> MovementResult {
        let previous_index = self.state.index;
        let previous_limit = self.current_limit();
        let new_index = self.clamp_index(previous_index as i64 + i64::from(movement));

        self.state.index = new_index;
        self.state.last_reason = Some(reason.clone());

        MovementResult {
            date,
            previous_index,
            new_index,
            notch_movement: movement,
            applied_movement: i32::try_from(new_index as i64 - previous_index as i64)
                .unwrap_or_default(),
            previous_limit,
            new_limit: self.current_limit(),
            reason,
            consecutive_non_adverse_days: self.state.consecutive_non_adverse_days,
        }
    }

    fn clamp_index(&self, index: i64) -> usize {
        index.clamp(0, self.config.max_index() as i64) as usize
    }

    fn limit_at(&self, index: usize) -> Decimal {
        self.config.limits[index.min(self.config.max_index())]
    }

    fn push_history(&mut self, outcome: DailyOutcome) {
        self.state.history.push_back(outcome);
        while self.state.history.len() > self.config.history_len {
            self.state.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap() + chrono::Days::new(u64::from(n))
    }

    fn ladder() -> RiskLadder {
        RiskLadder::new(RiskLadderConfig::default()).unwrap()
    }

    #[test]
    fn starts_at_default_index() {
        let ladder = ladder();
        assert_eq!(ladder.current_index(), 2);
        assert_eq!(ladder.current_limit(), dec!(500));
    }

    #[test]
    fn protective_trigger_moves_at_least_two() {
        let mut ladder = ladder();
        let trigger = ladder.config().protective_trigger_loss;
        let result = ladder
            .process_daily_pnl(trigger - Decimal::ONE, day(0), None)
            .unwrap();
        assert!(result.notch_movement >= 2);
        assert_eq!(result.reason, MovementReason::ProtectiveTrigger);
        assert_eq!(ladder.current_index(), 4);
    }

    #[test]
    fn protective_trigger_uses_loss_scaling_when_larger() {
        let mut ladder = ladder();
        let result = ladder.process_daily_pnl(dec!(-350), day(0), None).unwrap();
        assert_eq!(result.notch_movement, 3);
        assert_eq!(ladder.current_index(), 5);
    }

    #[test]
    fn protective_trigger_at_exact_threshold_fires() {
        let mut ladder = ladder();
        let result = ladder.process_daily_pnl(dec!(-75), day(0), None).unwrap();
        assert_eq!(result.reason, MovementReason::ProtectiveTrigger);
    }

    #[test]
    fn three_protective_days_reach_the_bottom() {
        let mut ladder = ladder();
        for n in 0..3 {
            ladder.process_daily_pnl(dec!(-80), day(n), None).unwrap();
        }
        assert_eq!(ladder.current_index(), 5);
        assert_eq!(ladder.current_limit(), dec!(100));
    }

    #[test]
    fn small_loss_moves_one_notch() {
        let mut ladder = ladder();
        let result = ladder.process_daily_pnl(dec!(-20), day(0), None).unwrap();
        assert_eq!(result.notch_movement, 1);
        assert_eq!(result.reason, MovementReason::LossDriven);
    }

    #[test]
    fn loss_scaling_uses_sensitivity() {
        let config = RiskLadderConfig {
            protective_trigger_loss: dec!(-1000),
            scaling_sensitivity: dec!(2),
            ..Default::default()
        };
        let ladder = RiskLadder::new(config).unwrap();
        assert_eq!(ladder.loss_notches(dec!(-150)), 3);
        assert_eq!(ladder.loss_notches(dec!(-10)), 1);
    }

    #[test]
    fn extreme_loss_saturates_at_ladder_length() {
        let config = RiskLadderConfig {
            scaling_sensitivity: dec!(1000),
            ..Default::default()
        };
        let mut ladder = RiskLadder::new(config).unwrap();
        assert_eq!(ladder.loss_notches(Decimal::MIN), 6);

        let result = ladder.process_daily_pnl(Decimal::MIN, day(0), None).unwrap();
        assert_eq!(result.new_index, 5);
        assert_eq!(ladder.current_limit(), dec!(100));
    }

    #[test]
    fn win_rate_equal_to_threshold_does_not_move() {
        let mut ladder = ladder();
        let result = ladder.process_daily_pnl(dec!(0), day(0), Some(0.60)).unwrap();
        assert_eq!(result.notch_movement, 0);
        assert_eq!(result.reason, MovementReason::Neutral);
    }

    #[test]
    fn win_rate_below_threshold_scales_with_deficit() {
        let ladder = ladder();
        assert_eq!(ladder.win_rate_notches(0.55), Some(1));
        assert_eq!(ladder.win_rate_notches(0.50), Some(2));
        assert_eq!(ladder.win_rate_notches(0.35), Some(3));
        assert_eq!(ladder.win_rate_notches(0.65), None);
        assert_eq!(ladder.win_rate_notches(f64::NAN), None);
    }

    #[test]
    fn win_rate_protection_on_profitable_day() {
        let mut ladder = ladder();
        let result = ladder.process_daily_pnl(dec!(40), day(0), Some(0.5)).unwrap();
        assert_eq!(result.reason, MovementReason::WinRateProtection);
        assert_eq!(result.notch_movement, 2);
        assert_eq!(result.consecutive_non_adverse_days, 0);
    }

    #[test]
    fn larger_of_loss_and_win_rate_applies() {
        let config = RiskLadderConfig {
            protective_trigger_loss: dec!(-1000),
            ..Default::default()
        };
        let ladder = RiskLadder::new(config).unwrap();
        let (movement, reason) = ladder.evaluate(dec!(-320), Some(0.55));
        assert_eq!(movement, 3);
        assert_eq!(reason, MovementReason::LossDriven);

        let (movement, reason) = ladder.evaluate(dec!(-10), Some(0.55));
        assert_eq!(movement, 1);
        assert_eq!(reason, MovementReason::WinRateProtection);
    }

    #[test]
    fn profit_moves_up_only_after_confirmation() {
        let mut ladder = ladder();
        let first = ladder.process_daily_pnl(dec!(50), day(0), None).unwrap();
        assert_eq!(first.reason, MovementReason::AwaitingConfirmation);
        assert_eq!(ladder.current_index(), 2);

        let second = ladder.process_daily_pnl(dec!(50), day(1), None).unwrap();
        assert_eq!(second.reason, MovementReason::ProfitConfirmed);
        assert_eq!(second.notch_movement, -1);
        assert_eq!(ladder.current_index(), 1);
        assert_eq!(second.consecutive_non_adverse_days, 0);
    }

    #[test]
    fn flat_day_counts_toward_confirmation() {
        let mut ladder = ladder();
        ladder.process_daily_pnl(dec!(0), day(0), None).unwrap();
        let result = ladder.process_daily_pnl(dec!(25), day(1), None).unwrap();
        assert_eq!(result.reason, MovementReason::ProfitConfirmed);
    }

    #[test]
    fn adverse_day_resets_confirmation() {
        let mut ladder = ladder();
        ladder.process_daily_pnl(dec!(50), day(0), None).unwrap();
        ladder.process_daily_pnl(dec!(-90), day(1), None).unwrap();
        assert_eq!(ladder.state().consecutive_non_adverse_days, 0);

        let result = ladder.process_daily_pnl(dec!(50), day(2), None).unwrap();
        assert_eq!(result.reason, MovementReason::AwaitingConfirmation);
    }

    #[test]
    fn profit_at_top_is_clamped() {
        let config = RiskLadderConfig {
            default_index: 0,
            confirmation_days: 0,
            ..Default::default()
        };
        let mut ladder = RiskLadder::new(config).unwrap();
        let result = ladder.process_daily_pnl(dec!(500), day(0), None).unwrap();
        assert_eq!(result.notch_movement, -1);
        assert_eq!(result.applied_movement, 0);
        assert_eq!(ladder.current_index(), 0);
    }

    #[test]
    fn out_of_order_day_is_rejected() {
        let mut ladder = ladder();
        ladder.process_daily_pnl(dec!(10), day(5), None).unwrap();
        let err = ladder
            .process_daily_pnl(dec!(-500), day(4), None)
            .unwrap_err();
        assert!(matches!(err, LadderError::OutOfOrder { .. }));
        assert_eq!(ladder.current_index(), 2);

        assert!(ladder.process_daily_pnl(dec!(10), day(5), None).is_err());
    }

    #[test]
    fn reset_to_notch_clamps_and_records_reason() {
        let mut ladder = ladder();
        ladder.process_daily_pnl(dec!(30), day(0), None).unwrap();
        let result = ladder.reset_to_notch(42, "operator override");
        assert_eq!(result.new_index, 5);
        assert_eq!(
            result.reason,
            MovementReason::ManualReset {
                reason: "operator override".to_string()
            }
        );
        assert_eq!(ladder.state().consecutive_non_adverse_days, 0);
    }

    #[test]
    fn history_is_bounded() {
        let config = RiskLadderConfig {
            history_len: 3,
            ..Default::default()
        };
        let mut ladder = RiskLadder::new(config).unwrap();
        for n in 0..6 {
            ladder.process_daily_pnl(dec!(5), day(n), None).unwrap();
        }
        assert_eq!(ladder.state().history.len(), 3);
        assert_eq!(ladder.state().history.front().unwrap().date, day(3));
    }

    #[test]
    fn restore_clamps_stored_index() {
        let checkpoint = LadderCheckpoint {
            account_id: "acct".to_string(),
            index: 99,
            consecutive_non_adverse_days: 1,
            last_processed_date: Some(day(3)),
            updated_at: Utc::now(),
        };
        let ladder = RiskLadder::restore(RiskLadderConfig::default(), &checkpoint).unwrap();
        assert_eq!(ladder.current_index(), 5);
        assert_eq!(ladder.state().last_reason, Some(MovementReason::Restored));
    }

    fn pnl() -> impl Strategy<Value = Decimal> {
        (-2_000i64..2_000i64).prop_map(Decimal::from)
    }

    fn win_rate() -> impl Strategy<Value = Option<f64>> {
        prop_oneof![Just(None), (0.0..=1.0f64).prop_map(Some)]
    }

    proptest! {
        #[test]
        fn index_stays_in_range(days in prop::collection::vec((pnl(), win_rate()), 1..60)) {
            let mut ladder = ladder();
            for (n, (pnl, wr)) in days.into_iter().enumerate() {
                ladder.process_daily_pnl(pnl, day(n as u32), wr).unwrap();
                prop_assert!(ladder.current_index() <= ladder.config().max_index());
                prop_assert!(ladder.config().limits.contains(&ladder.current_limit()));
            }
        }

        #[test]
        fn identical_sequences_are_deterministic(days in prop::collection::vec((pnl(), win_rate()), 1..30)) {
            let mut a = ladder();
            let mut b = ladder();
            for (n, (pnl, wr)) in days.into_iter().enumerate() {
                a.process_daily_pnl(pnl, day(n as u32), wr).unwrap();
                b.process_daily_pnl(pnl, day(n as u32), wr).unwrap();
            }
            prop_assert_eq!(a.state(), b.state());
        }
    }
}
