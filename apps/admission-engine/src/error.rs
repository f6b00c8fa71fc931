//! Crate-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::ladder::{BookError, LadderConfigError};
use crate::scoring::{PolicyError, ScoringError};

/// Errors surfaced by [`crate::pipeline::AdmissionPipeline`].
///
/// Validation denials are not errors; they come back as a denied outcome
/// carrying a [`crate::gate::ReasonCode`].
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Scoring inputs were rejected.
    #[error("scoring failed: {0}")]
    Scoring(#[from] ScoringError),

    /// Ladder update, load or checkpoint failed.
    #[error("ladder book: {0}")]
    Book(#[from] BookError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Scoring policy rejected at construction.
    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyError),

    /// Ladder configuration rejected at construction.
    #[error("invalid ladder config: {0}")]
    LadderConfig(#[from] LadderConfigError),
}
