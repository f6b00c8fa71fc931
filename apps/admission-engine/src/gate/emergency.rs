//! Per-strategy emergency mode.
//!
//! Counts consecutive primary-validator failures per strategy key. Reaching
//! the threshold latches emergency mode for that key: every request is
//! denied until an operator clears it. A later primary success resets the
//! counter but leaves the latch set.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::types::EmergencyStatus;
use crate::observability::record_emergency_mode;

#[derive(Debug, Default, Clone)]
struct Entry {
    consecutive_failures: u32,
    entered_at: Option<DateTime<Utc>>,
}

/// Emergency mode latch keyed by strategy.
#[derive(Debug)]
pub struct EmergencyTracker {
    threshold: u32,
    entries: RwLock<HashMap<String, Entry>>,
}

impl EmergencyTracker {
    /// Tracker that latches after `threshold` consecutive failures.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Failure threshold.
    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether `key` is latched.
    #[must_use]
    pub fn is_active(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .is_some_and(|e| e.entered_at.is_some())
    }

    /// Record a primary failure. Returns `true` if this call latched the key.
    pub fn record_failure(&self, key: &str) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = entries.entry(key.to_string()).or_default();
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);

        if entry.entered_at.is_some() || entry.consecutive_failures < self.threshold {
            return false;
        }

        entry.entered_at = Some(Utc::now());
        tracing::error!(
            strategy_key = key,
            consecutive_failures = entry.consecutive_failures,
            threshold = self.threshold,
            "Emergency mode entered; trading halted for strategy"
        );
        record_emergency_mode(key, true);
        true
    }

    /// Record a primary success. Resets the failure run only.
    pub fn record_success(&self, key: &str) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(key) {
            entry.consecutive_failures = 0;
        }
    }

    /// Release the latch on `key`. Returns `false` if it was not latched.
    pub fn clear(&self, key: &str) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        if entry.entered_at.take().is_none() {
            return false;
        }
        entry.consecutive_failures = 0;
        drop(entries);

        tracing::warn!(strategy_key = key, "Emergency mode cleared");
        record_emergency_mode(key, false);
        true
    }

    /// Status of every tracked key, sorted by key.
    #[must_use]
    pub fn statuses(&self) -> Vec<EmergencyStatus> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut statuses: Vec<EmergencyStatus> = entries
            .iter()
            .map(|(key, e)| EmergencyStatus {
                strategy_key: key.clone(),
                consecutive_failures: e.consecutive_failures,
                active: e.entered_at.is_some(),
                entered_at: e.entered_at,
            })
            .collect();
        statuses.sort_by(|a, b| a.strategy_key.cmp(&b.strategy_key));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latches_at_threshold() {
        let tracker = EmergencyTracker::new(3);
        assert!(!tracker.record_failure("a"));
        assert!(!tracker.record_failure("a"));
        assert!(!tracker.is_active("a"));
        assert!(tracker.record_failure("a"));
        assert!(tracker.is_active("a"));
        assert!(!tracker.record_failure("a"));
    }

    #[test]
    fn success_resets_run_but_not_latch() {
        let tracker = EmergencyTracker::new(2);
        tracker.record_failure("a");
        tracker.record_success("a");
        tracker.record_failure("a");
        assert!(!tracker.is_active("a"));

        tracker.record_failure("a");
        assert!(tracker.is_active("a"));
        tracker.record_success("a");
        assert!(tracker.is_active("a"));
    }

    #[test]
    fn keys_are_independent() {
        let tracker = EmergencyTracker::new(1);
        tracker.record_failure("a");
        assert!(tracker.is_active("a"));
        assert!(!tracker.is_active("b"));
    }

    #[test]
    fn clear_only_releases_latched_keys() {
        let tracker = EmergencyTracker::new(1);
        assert!(!tracker.clear("a"));
        tracker.record_failure("a");
        assert!(tracker.clear("a"));
        assert!(!tracker.is_active("a"));
        assert!(!tracker.clear("a"));
    }

    #[test]
    fn statuses_are_sorted() {
        let tracker = EmergencyTracker::new(5);
        tracker.record_failure("b");
        tracker.record_failure("a");
        let statuses = tracker.statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].strategy_key, "a");
        assert_eq!(statuses[1].consecutive_failures, 1);
        assert!(!statuses[1].active);
    }
}
