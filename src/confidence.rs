// Confidence Tracker: Wilson-score lower-bound confidence per node
// (spec.md §4.2). Grounded on the Python original's `ConfidenceTracker`
// (examples/original_source/python/vesper_verification/confidence.py),
// rewritten with the teacher's locking discipline for shared counters
// (knhk-closed-loop/src/observation.rs uses `DashMap` per-entry; here each
// node's counters must move together for a consistent Wilson read, so each
// entry is a `parking_lot::Mutex<RuntimeMetrics>` inside the map).

use crate::routing::Mode;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MIN_SAMPLE_SIZE: u64 = 100;
const Z_SCORE: f64 = 3.29;

/// Monotonically non-decreasing counters for one node (spec.md §3).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeMetrics {
    pub total: u64,
    pub divergences: u64,
    pub oracle_errors: u64,
    pub candidate_errors: u64,
    pub last_updated_epoch_seconds: f64,
}

impl RuntimeMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.total - self.divergences) as f64 / self.total as f64
        }
    }

    pub fn divergence_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.divergences as f64 / self.total as f64
        }
    }
}

/// Persistable snapshot of tracker state (spec.md §6 Persistence).
pub type ConfidenceSnapshot = std::collections::HashMap<String, RuntimeMetrics>;

/// Tracks execution outcomes per node and derives a Wilson lower-bound
/// confidence that the candidate is semantically equivalent to the oracle.
#[derive(Clone, Default)]
pub struct ConfidenceTracker {
    metrics: Arc<DashMap<String, Mutex<RuntimeMetrics>>>,
}

impl ConfidenceTracker {
    pub fn new() -> Self {
        ConfidenceTracker {
            metrics: Arc::new(DashMap::new()),
        }
    }

    pub fn record_execution(
        &self,
        node_id: &str,
        diverged: bool,
        oracle_error: bool,
        candidate_error: bool,
    ) {
        let entry = self
            .metrics
            .entry(node_id.to_string())
            .or_insert_with(|| Mutex::new(RuntimeMetrics::default()));
        let mut m = entry.lock();
        m.total += 1;
        if diverged {
            m.divergences += 1;
        }
        if oracle_error {
            m.oracle_errors += 1;
        }
        if candidate_error {
            m.candidate_errors += 1;
        }
        m.last_updated_epoch_seconds = now_epoch_seconds();
    }

    /// Snapshot of one node's raw counters, consistent as of the read.
    pub fn metrics(&self, node_id: &str) -> Option<RuntimeMetrics> {
        self.metrics.get(node_id).map(|entry| entry.lock().clone())
    }

    /// Wilson lower-bound confidence at z=3.29, or 0.0 below MIN_SAMPLE_SIZE.
    pub fn confidence(&self, node_id: &str) -> f64 {
        let Some(m) = self.metrics(node_id) else {
            return 0.0;
        };
        Self::wilson_lower_bound(m.total, m.divergences)
    }

    fn wilson_lower_bound(total: u64, divergences: u64) -> f64 {
        if total < MIN_SAMPLE_SIZE {
            return 0.0;
        }

        let n = total as f64;
        let s = (total - divergences) as f64;
        let p = s / n;
        let z = Z_SCORE;

        let denom = 1.0 + z * z / n;
        let centre = (p + z * z / (2.0 * n)) / denom;
        let margin = z * ((p * (1.0 - p) / n + z * z / (4.0 * n * n)).sqrt()) / denom;

        (centre - margin).max(0.0)
    }

    pub fn recommended_mode(&self, node_id: &str) -> Mode {
        Self::mode_for_confidence(self.confidence(node_id))
    }

    pub fn mode_for_confidence(confidence: f64) -> Mode {
        if confidence < 0.95 {
            Mode::OracleOnly
        } else if confidence < 0.999 {
            Mode::Canary
        } else if confidence < 0.9999 {
            Mode::DualVerify
        } else {
            Mode::DirectOnly
        }
    }

    pub fn reset(&self, node_id: &str) {
        self.metrics.remove(node_id);
    }

    pub fn reset_all(&self) {
        self.metrics.clear();
    }

    pub fn snapshot(&self) -> ConfidenceSnapshot {
        self.metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lock().clone()))
            .collect()
    }

    pub fn restore(snapshot: ConfidenceSnapshot) -> Self {
        let metrics = DashMap::new();
        for (node_id, m) in snapshot {
            metrics.insert(node_id, Mutex::new(m));
        }
        ConfidenceTracker {
            metrics: Arc::new(metrics),
        }
    }
}

fn now_epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_zero_below_min_sample_size() {
        let tracker = ConfidenceTracker::new();
        for _ in 0..MIN_SAMPLE_SIZE - 1 {
            tracker.record_execution("n1", false, false, false);
        }
        assert_eq!(tracker.confidence("n1"), 0.0);
    }

    #[test]
    fn perfect_agreement_at_min_sample_clears_canary_threshold() {
        let tracker = ConfidenceTracker::new();
        for _ in 0..100 {
            tracker.record_execution("n1", false, false, false);
        }
        assert!(tracker.confidence("n1") > 0.94);
    }

    #[test]
    fn all_diverging_yields_zero_confidence() {
        let tracker = ConfidenceTracker::new();
        for _ in 0..10 {
            tracker.record_execution("n1", true, false, false);
        }
        assert_eq!(tracker.confidence("n1"), 0.0);
    }

    #[test]
    fn recommendation_transitions_at_documented_thresholds() {
        assert_eq!(
            ConfidenceTracker::mode_for_confidence(0.9499),
            Mode::OracleOnly
        );
        assert_eq!(ConfidenceTracker::mode_for_confidence(0.95), Mode::Canary);
        assert_eq!(
            ConfidenceTracker::mode_for_confidence(0.9989),
            Mode::Canary
        );
        assert_eq!(
            ConfidenceTracker::mode_for_confidence(0.999),
            Mode::DualVerify
        );
        assert_eq!(
            ConfidenceTracker::mode_for_confidence(0.9999),
            Mode::DirectOnly
        );
    }

    #[test]
    fn monotonic_counters_across_calls() {
        let tracker = ConfidenceTracker::new();
        let mut prev = RuntimeMetrics::default();
        for i in 0..500 {
            tracker.record_execution("n1", i % 7 == 0, i % 11 == 0, i % 13 == 0);
            let cur = tracker.metrics("n1").unwrap();
            assert!(cur.total >= prev.total);
            assert!(cur.divergences >= prev.divergences);
            assert!(cur.oracle_errors >= prev.oracle_errors);
            assert!(cur.candidate_errors >= prev.candidate_errors);
            prev = cur;
        }
    }

    #[test]
    fn restore_yields_identical_confidence() {
        let tracker = ConfidenceTracker::new();
        for i in 0..200 {
            tracker.record_execution("n1", i % 5 == 0, false, false);
        }
        let snapshot = tracker.snapshot();
        let before = tracker.confidence("n1");

        let restored = ConfidenceTracker::restore(snapshot);
        let after = restored.confidence("n1");

        assert_eq!(before, after);
        assert_eq!(tracker.metrics("n1"), restored.metrics("n1"));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn confidence_monotonic_in_sample_size_at_fixed_rate(
            n1 in 100u64..2000,
            extra in 1u64..2000,
        ) {
            let n2 = n1 + extra;
            let divergence_rate = 0.01;
            let d1 = (n1 as f64 * divergence_rate) as u64;
            let d2 = (n2 as f64 * divergence_rate) as u64;

            let c1 = ConfidenceTracker::wilson_lower_bound(n1, d1);
            let c2 = ConfidenceTracker::wilson_lower_bound(n2, d2);

            prop_assert!(c2 >= c1 - 1e-6);
        }
    }
}
