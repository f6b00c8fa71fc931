//! Ladder state persistence configuration.

use serde::{Deserialize, Serialize};

/// Ladder state persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Persist ladder checkpoints to disk. When false they live in memory.
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,
    /// JSON file holding every account's checkpoint.
    #[serde(default = "default_ladder_state_path")]
    pub ladder_state_path: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            ladder_state_path: default_ladder_state_path(),
        }
    }
}

const fn default_persistence_enabled() -> bool {
    true
}

fn default_ladder_state_path() -> String {
    "./data/ladder_state.json".to_string()
}
