//! RevFibNotch adaptive risk ladder.
//!
//! Tracks, per account, which rung of a strictly decreasing ladder of
//! per-trade risk limits is in force, and moves it once per trading day
//! from realized P&L and win rate.
//!
//! # Example
//!
//! ```rust,ignore
//! use admission_engine::ladder::{RiskLadder, RiskLadderConfig};
//! use rust_decimal_macros::dec;
//!
//! let mut ladder = RiskLadder::new(RiskLadderConfig::default())?;
//! let result = ladder.process_daily_pnl(dec!(-80), date, None)?;
//! assert_eq!(result.new_index, 4);
//! assert_eq!(ladder.current_limit(), dec!(200));
//! ```

mod book;
mod config;
mod guardrail;
mod notch;
mod sizing;
mod store;

pub use book::{BookError, LadderBook};
pub use config::{LadderConfigError, RiskLadderConfig};
pub use guardrail::{GuardrailBreach, GuardrailReport, GuardrailSchedule, audit_daily_losses};
pub use notch::{
    DailyOutcome, LadderError, MovementReason, MovementResult, RiskLadder, RiskLadderState,
};
pub use sizing::{
    CONTRACT_MULTIPLIER, PositionSizer, SizedPosition, checked_max_loss_per_contract,
    max_loss_per_contract,
};
pub use store::{
    InMemoryLadderStore, JsonFileLadderStore, LadderCheckpoint, LadderStore, StoreError,
};
