// Execution Router: (node, inputs, confidence, overrides) -> RoutingDecision
// (spec.md §4.5). Grounded on the Python original's `ExecutionRouter`
// (examples/original_source/python/vesper_verification/routing.py), with
// the routing hash upgraded from the original's `hashlib.md5` to `sha2`
// since nothing in the teacher's dependency stack reaches for md5 and this
// hash serves no cryptographic purpose beyond a stable, uniform spread.

use crate::confidence::{ConfidenceTracker, MIN_SAMPLE_SIZE};
use crate::value::OrderedMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    OracleOnly,
    Shadow,
    Canary,
    DualVerify,
    DirectOnly,
}

/// Fully derived routing decision; never persisted (spec.md §3).
#[derive(Clone, Debug, PartialEq)]
pub struct RoutingDecision {
    pub mode: Mode,
    pub use_oracle: bool,
    pub use_candidate: bool,
    pub is_shadow: bool,
    pub verify_outputs: bool,
    pub reason: String,
}

impl RoutingDecision {
    pub fn oracle_only(reason: impl Into<String>) -> Self {
        RoutingDecision {
            mode: Mode::OracleOnly,
            use_oracle: true,
            use_candidate: false,
            is_shadow: false,
            verify_outputs: false,
            reason: reason.into(),
        }
    }

    pub fn shadow(reason: impl Into<String>) -> Self {
        RoutingDecision {
            mode: Mode::Shadow,
            use_oracle: true,
            use_candidate: true,
            is_shadow: true,
            verify_outputs: false,
            reason: reason.into(),
        }
    }

    pub fn dual_verify(reason: impl Into<String>) -> Self {
        RoutingDecision {
            mode: Mode::DualVerify,
            use_oracle: true,
            use_candidate: true,
            is_shadow: false,
            verify_outputs: true,
            reason: reason.into(),
        }
    }

    pub fn direct_only(reason: impl Into<String>) -> Self {
        RoutingDecision {
            mode: Mode::DirectOnly,
            use_oracle: false,
            use_candidate: true,
            is_shadow: false,
            verify_outputs: false,
            reason: reason.into(),
        }
    }

    fn canary_to_candidate(reason: impl Into<String>) -> Self {
        RoutingDecision {
            mode: Mode::Canary,
            use_oracle: false,
            use_candidate: true,
            is_shadow: false,
            verify_outputs: false,
            reason: reason.into(),
        }
    }

    fn canary_to_oracle(reason: impl Into<String>) -> Self {
        RoutingDecision {
            mode: Mode::Canary,
            use_oracle: true,
            use_candidate: false,
            is_shadow: false,
            verify_outputs: false,
            reason: reason.into(),
        }
    }

    fn direct_only_with_verify(reason: impl Into<String>) -> Self {
        RoutingDecision {
            mode: Mode::DirectOnly,
            use_oracle: true,
            use_candidate: true,
            is_shadow: false,
            verify_outputs: true,
            reason: reason.into(),
        }
    }

    fn for_mode(mode: Mode, reason: impl Into<String>) -> Self {
        match mode {
            Mode::OracleOnly => Self::oracle_only(reason),
            Mode::Shadow => Self::shadow(reason),
            Mode::Canary => Self::canary_to_candidate(reason),
            Mode::DualVerify => Self::dual_verify(reason),
            Mode::DirectOnly => Self::direct_only(reason),
        }
    }
}

/// Thresholds and sampling fractions (spec.md §3, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub canary_threshold: f64,
    pub dual_verify_threshold: f64,
    pub direct_only_threshold: f64,
    pub canary_percentage: f64,
    pub direct_only_sample_rate: f64,
    pub shadow_mode_enabled: bool,
    pub node_overrides: HashMap<String, Mode>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            canary_threshold: 0.95,
            dual_verify_threshold: 0.999,
            direct_only_threshold: 0.9999,
            canary_percentage: 0.05,
            direct_only_sample_rate: 0.01,
            shadow_mode_enabled: true,
            node_overrides: HashMap::new(),
        }
    }
}

/// Source of randomness for the direct-only sampling draw. Injectable so
/// tests get deterministic routing (spec.md §9 open question).
pub trait RngSource: Send + Sync {
    fn sample_unit(&self) -> f64;
}

pub struct ThreadRngSource;

impl RngSource for ThreadRngSource {
    fn sample_unit(&self) -> f64 {
        use rand::Rng;
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic RNG stand-in for tests: always reports the same draw.
pub struct FixedRngSource(pub f64);

impl RngSource for FixedRngSource {
    fn sample_unit(&self) -> f64 {
        self.0
    }
}

pub struct ExecutionRouter {
    confidence_tracker: ConfidenceTracker,
    config: arc_swap::ArcSwap<RoutingConfig>,
    rng: Box<dyn RngSource>,
}

impl ExecutionRouter {
    pub fn new(confidence_tracker: ConfidenceTracker, config: RoutingConfig) -> Self {
        ExecutionRouter {
            confidence_tracker,
            config: arc_swap::ArcSwap::new(std::sync::Arc::new(config)),
            rng: Box::new(ThreadRngSource),
        }
    }

    pub fn with_rng(mut self, rng: Box<dyn RngSource>) -> Self {
        self.rng = rng;
        self
    }

    pub fn config(&self) -> std::sync::Arc<RoutingConfig> {
        self.config.load_full()
    }

    pub fn set_config(&self, config: RoutingConfig) {
        self.config.store(std::sync::Arc::new(config));
    }

    pub fn set_node_override(&self, node_id: impl Into<String>, mode: Mode) {
        let mut cfg = (**self.config.load()).clone();
        cfg.node_overrides.insert(node_id.into(), mode);
        self.set_config(cfg);
    }

    pub fn clear_node_override(&self, node_id: &str) {
        let mut cfg = (**self.config.load()).clone();
        cfg.node_overrides.remove(node_id);
        self.set_config(cfg);
    }

    /// Decide how to route one request (spec.md §4.5 decision procedure).
    pub fn route(
        &self,
        node_id: &str,
        inputs: &OrderedMap,
        forced_mode: Option<Mode>,
    ) -> RoutingDecision {
        let config = self.config.load();

        if let Some(mode) = forced_mode {
            return RoutingDecision::for_mode(mode, "forced by caller");
        }

        if let Some(mode) = config.node_overrides.get(node_id) {
            return RoutingDecision::for_mode(*mode, format!("node override to {:?}", mode));
        }

        let metrics = self.confidence_tracker.metrics(node_id);
        let total = metrics.as_ref().map(|m| m.total).unwrap_or(0);

        if total < MIN_SAMPLE_SIZE {
            return RoutingDecision::oracle_only(format!(
                "insufficient data ({} executions)",
                total
            ));
        }

        let confidence = self.confidence_tracker.confidence(node_id);

        if confidence < config.canary_threshold {
            RoutingDecision::oracle_only(format!(
                "low confidence ({:.4} < {:.4})",
                confidence, config.canary_threshold
            ))
        } else if confidence < config.dual_verify_threshold {
            self.canary_decision(node_id, inputs, confidence, &config)
        } else if confidence < config.direct_only_threshold {
            RoutingDecision::dual_verify(format!(
                "high confidence ({:.4}), continuous verification",
                confidence
            ))
        } else {
            self.direct_only_decision(confidence, &config)
        }
    }

    fn canary_decision(
        &self,
        node_id: &str,
        inputs: &OrderedMap,
        confidence: f64,
        config: &RoutingConfig,
    ) -> RoutingDecision {
        let fraction = stable_hash_fraction(node_id, inputs);
        if fraction < config.canary_percentage {
            RoutingDecision::canary_to_candidate(format!(
                "canary ({:.0}% traffic to candidate), confidence {:.4}",
                config.canary_percentage * 100.0,
                confidence
            ))
        } else {
            RoutingDecision::canary_to_oracle(format!(
                "canary ({:.0}% traffic to oracle), confidence {:.4}",
                (1.0 - config.canary_percentage) * 100.0,
                confidence
            ))
        }
    }

    fn direct_only_decision(&self, confidence: f64, config: &RoutingConfig) -> RoutingDecision {
        if self.rng.sample_unit() < config.direct_only_sample_rate {
            RoutingDecision::direct_only_with_verify(format!(
                "direct with sampling ({:.0}% verification)",
                config.direct_only_sample_rate * 100.0
            ))
        } else {
            RoutingDecision::direct_only(format!("very high confidence ({:.4})", confidence))
        }
    }
}

/// Deterministic hash over (node_id, canonical-json(inputs)) mapped into
/// [0, 1), used for reproducible canary routing (spec.md §4.5).
pub fn stable_hash_fraction(node_id: &str, inputs: &OrderedMap) -> f64 {
    let hash_input = format!("{}:{}", node_id, inputs.canonical_json());
    let digest = Sha256::digest(hash_input.as_bytes());
    // Mirrors the hexdigest()[:8] truncation the original routed on, just
    // without the weak hash: hex-encode, take the first 8 hex chars, parse.
    let hex_digest = hex::encode(digest);
    let value = u32::from_str_radix(&hex_digest[0..8], 16).expect("hex digest prefix is valid hex");
    (value as f64) / (u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::omap;

    fn tracker_at(node: &str, total: u64, divergences: u64) -> ConfidenceTracker {
        let tracker = ConfidenceTracker::new();
        for i in 0..total {
            tracker.record_execution(node, i < divergences, false, false);
        }
        tracker
    }

    #[test]
    fn insufficient_data_routes_oracle_only() {
        let tracker = tracker_at("n1", 10, 0);
        let router = ExecutionRouter::new(tracker, RoutingConfig::default());
        let decision = router.route("n1", &omap! {}, None);
        assert_eq!(decision.mode, Mode::OracleOnly);
    }

    #[test]
    fn node_override_pins_mode_regardless_of_confidence() {
        let tracker = tracker_at("n1", 1000, 0);
        let router = ExecutionRouter::new(tracker, RoutingConfig::default());
        router.set_node_override("n1", Mode::OracleOnly);
        let decision = router.route("n1", &omap! {}, None);
        assert_eq!(decision.mode, Mode::OracleOnly);
    }

    #[test]
    fn forced_mode_takes_precedence_over_override() {
        let tracker = tracker_at("n1", 1000, 0);
        let router = ExecutionRouter::new(tracker, RoutingConfig::default());
        router.set_node_override("n1", Mode::OracleOnly);
        let decision = router.route("n1", &omap! {}, Some(Mode::DirectOnly));
        assert_eq!(decision.mode, Mode::DirectOnly);
    }

    #[test]
    fn routing_is_deterministic_for_identical_inputs() {
        let tracker = tracker_at("n1", 1000, 40); // ~96% success -> canary band
        let router = ExecutionRouter::new(tracker, RoutingConfig::default());
        let inputs = omap! { "x" => 7i64 };

        let d1 = router.route("n1", &inputs, None);
        let d2 = router.route("n1", &inputs, None);
        assert_eq!(d1.use_candidate, d2.use_candidate);
    }

    #[test]
    fn canary_fraction_routed_to_candidate_is_close_to_configured_percentage() {
        let tracker = tracker_at("n1", 1000, 30); // confidence in canary band
        let router = ExecutionRouter::new(tracker, RoutingConfig::default());

        let mut routed_to_candidate = 0;
        let total = 10_000;
        for i in 0..total {
            let inputs = omap! { "i" => i as i64 };
            let decision = router.route("n1", &inputs, None);
            assert_eq!(decision.mode, Mode::Canary);
            if decision.use_candidate {
                routed_to_candidate += 1;
            }
        }

        let fraction = routed_to_candidate as f64 / total as f64;
        assert!(fraction >= 0.04 && fraction <= 0.06, "fraction={fraction}");
    }

    #[test]
    fn direct_only_sampling_upgrades_to_dual_verify_at_configured_rate() {
        let tracker = tracker_at("n1", 1000, 0);
        let router =
            ExecutionRouter::new(tracker, RoutingConfig::default()).with_rng(Box::new(FixedRngSource(0.005)));
        let decision = router.route("n1", &omap! {}, None);
        assert_eq!(decision.mode, Mode::DirectOnly);
        assert!(decision.verify_outputs);
        assert!(decision.use_oracle && decision.use_candidate);
    }

    #[test]
    fn direct_only_without_sampling_draw_skips_verification() {
        let tracker = tracker_at("n1", 1000, 0);
        let router =
            ExecutionRouter::new(tracker, RoutingConfig::default()).with_rng(Box::new(FixedRngSource(0.5)));
        let decision = router.route("n1", &omap! {}, None);
        assert_eq!(decision.mode, Mode::DirectOnly);
        assert!(!decision.verify_outputs);
    }
}
