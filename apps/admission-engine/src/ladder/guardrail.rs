//! Reverse-Fibonacci daily loss guardrail audit.
//!
//! Replays realized daily P&L and flags any losing day whose loss exceeded
//! the allowance for the losing streak in force at the open. Allowances
//! shrink with each consecutive losing day; any non-losing day resets the
//! streak.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Loss allowances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailSchedule {
    /// Allowance reported on non-losing days.
    #[serde(default = "default_profit_day_allowance")]
    pub profit_day_allowance: Decimal,
    /// Allowance by losing streak at the open; the last entry repeats.
    #[serde(default = "default_streak_allowances")]
    pub streak_allowances: Vec<Decimal>,
}

impl Default for GuardrailSchedule {
    fn default() -> Self {
        Self {
            profit_day_allowance: default_profit_day_allowance(),
            streak_allowances: default_streak_allowances(),
        }
    }
}

impl GuardrailSchedule {
    fn allowance_for_streak(&self, streak: usize) -> Decimal {
        self.streak_allowances
            .get(streak)
            .or_else(|| self.streak_allowances.last())
            .copied()
            .unwrap_or(self.profit_day_allowance)
    }
}

fn default_profit_day_allowance() -> Decimal {
    dec!(500)
}

fn default_streak_allowances() -> Vec<Decimal> {
    vec![dec!(300), dec!(200), dec!(100)]
}

/// A day whose loss exceeded its allowance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailBreach {
    /// Trading day.
    pub date: NaiveDate,
    /// Net P&L for the day.
    pub net_pnl: Decimal,
    /// Losing streak at the open.
    pub loss_streak_at_open: usize,
    /// Loss allowed for that streak.
    pub allowed_loss: Decimal,
}

/// Audit outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailReport {
    /// Distinct days audited.
    pub days: usize,
    /// Days with a net loss.
    pub losing_days: usize,
    /// Breaches in date order.
    pub breaches: Vec<GuardrailBreach>,
}

impl GuardrailReport {
    /// Whether no day breached its allowance.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.breaches.is_empty()
    }
}

/// Audit daily P&L against the schedule.
///
/// Entries sharing a date are summed into one day. Input order does not
/// matter.
#[must_use]
pub fn audit_daily_losses(
    daily_pnl: &[(NaiveDate, Decimal)],
    schedule: &GuardrailSchedule,
) -> GuardrailReport {
    let mut by_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
    for &(date, pnl) in daily_pnl {
        *by_day.entry(date).or_default() += pnl;
    }

    let streak_cap = schedule.streak_allowances.len();
    let mut streak = 0usize;
    let mut report = GuardrailReport {
        days: by_day.len(),
        ..Default::default()
    };

    for (date, pnl) in by_day {
        if pnl >= Decimal::ZERO {
            streak = 0;
            continue;
        }

        report.losing_days += 1;
        let allowed_loss = schedule.allowance_for_streak(streak);
        if pnl.abs() > allowed_loss {
            tracing::warn!(%date, %pnl, %allowed_loss, streak, "Daily loss guardrail breached");
            report.breaches.push(GuardrailBreach {
                date,
                net_pnl: pnl,
                loss_streak_at_open: streak,
                allowed_loss,
            });
        }
        streak = (streak + 1).min(streak_cap);
    }

    report
}
