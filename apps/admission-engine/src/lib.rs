// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Admission Engine - Rust Core Library
//!
//! Deterministic trade admission core for 0DTE credit spreads.
//!
//! # Components (leaf first)
//!
//! - `resilience`: circuit breakers, bounded retry with cancellable
//!   backoff, cached health checks
//! - `scoring`: GoScore, seven signals to a Full/Half/Skip decision
//! - `ladder`: RevFibNotch risk ladder, per-account book with
//!   checkpointing, position sizing, daily loss guardrail audit
//! - `gate`: primary validator behind breaker and retry, cross-checked by
//!   the formula fallback, with per-strategy emergency mode
//! - `pipeline`: score, size and gate in one call
//!
//! # Ambient
//!
//! - `config`: YAML configuration with environment interpolation
//! - `telemetry`: tracing subscriber setup
//! - `observability`: metrics facade helpers

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod gate;
pub mod ladder;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod scoring;
pub mod telemetry;

pub use config::{EngineConfig, load_config, load_config_from_string};
pub use error::AdmissionError;
pub use gate::{ResilientGate, TradeExecutionResult, ValidationResult};
pub use ladder::{LadderBook, RiskLadder, RiskLadderConfig};
pub use pipeline::{AdmissionOutcome, AdmissionPipeline, Opportunity};
pub use scoring::{Decision, GoInputs, Policy, Scorer};
