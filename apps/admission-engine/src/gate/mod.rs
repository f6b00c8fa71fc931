//! Resilient execution gate.
//!
//! Validates a sized trade through a breaker- and retry-protected primary
//! validator, cross-checks it with a formula-based fallback, and latches
//! per-strategy emergency mode after repeated primary failures.

mod emergency;
mod fallback;
mod primary;
mod resilient;
mod types;

pub use emergency::EmergencyTracker;
pub use fallback::{FallbackConfig, FallbackValidator};
pub use primary::{PrimaryConfig, PrimaryValidator, RiskLimitValidator, ValidatorError};
pub use resilient::{GateConfig, GateError, ResilientGate};
pub use types::{
    EmergencyStatus, ReasonCode, RiskBudget, StatusSnapshot, TradeCandidate,
    TradeExecutionResult, TradeRequest, ValidationMethod, ValidationResult, Verdict,
};
