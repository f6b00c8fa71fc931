//! Observability: metrics recording helpers.
//!
//! Logging setup lives in [`crate::telemetry`].

mod metrics;

pub use metrics::{
    circuit_state_value, record_admission_decision, record_admission_latency,
    record_circuit_rejected, record_circuit_transition, record_emergency_mode,
    record_ladder_index, record_retry,
};
