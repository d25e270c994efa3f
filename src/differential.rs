// Differential Harness: batch-drives fixed or generated inputs through the
// orchestrator's dual-path execution and tallies divergences (spec.md §4.8).
// Grounded on the Python original's `DifferentialTester`
// (examples/original_source/python/vesper_verification/differential.py).

use crate::comparator::ComparisonReport;
use crate::orchestrator::Orchestrator;
use crate::value::OrderedMap;
use std::time::Instant;

/// A true divergence: both oracle and candidate succeeded but disagreed
/// (spec.md §4.8: "a divergence record captures the full structured diff,
/// both outputs, inputs, timestamp, and a fresh trace id").
#[derive(Clone, Debug)]
pub struct DivergenceReport {
    pub node_id: String,
    pub inputs: OrderedMap,
    pub oracle_output: Option<OrderedMap>,
    pub candidate_output: Option<OrderedMap>,
    pub details: Option<ComparisonReport>,
    pub timestamp_epoch_seconds: f64,
    pub trace_id: String,
}

/// A handler failure on either side, kept distinct from a true divergence:
/// no structured diff exists to compare when one side never produced an
/// output.
#[derive(Clone, Debug)]
pub struct DifferentialTestError {
    pub node_id: String,
    pub inputs: OrderedMap,
    pub oracle_error: Option<String>,
    pub candidate_error: Option<String>,
    pub trace_id: String,
}

#[derive(Clone, Debug, Default)]
pub struct DifferentialTestResult {
    pub node_id: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub divergences: Vec<DivergenceReport>,
    pub errors: Vec<DifferentialTestError>,
    pub duration_ms: f64,
}

impl DifferentialTestResult {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }
}

/// A source of test inputs: either a fixed list or an open-ended generator
/// (spec.md §2: "the caller supplies [inputs] or a generator").
pub enum InputSource<'a> {
    Fixed(Vec<OrderedMap>),
    Generator(Box<dyn FnMut(usize) -> OrderedMap + Send + 'a>),
}

/// Drives a node through `Orchestrator::execute_dual` over a batch of
/// inputs, invoking `on_divergence` for each true mismatch encountered.
pub struct DifferentialTester<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> DifferentialTester<'a> {
    pub fn new(orchestrator: &'a Orchestrator) -> Self {
        DifferentialTester { orchestrator }
    }

    pub async fn test_node(
        &self,
        node_id: &str,
        inputs: Vec<OrderedMap>,
        mut on_divergence: impl FnMut(&DivergenceReport),
    ) -> DifferentialTestResult {
        let start = Instant::now();
        let total = inputs.len();
        let mut passed = 0;
        let mut divergences = Vec::new();
        let mut errors = Vec::new();

        for input in inputs {
            let dual = self.orchestrator.execute_dual(node_id, &input).await;
            if !dual.diverged {
                passed += 1;
                continue;
            }

            let candidate_ok = dual
                .candidate_result
                .as_ref()
                .map(|c| c.success)
                .unwrap_or(false);

            if dual.result.success && candidate_ok {
                let report = DivergenceReport {
                    node_id: node_id.to_string(),
                    oracle_output: dual.result.output.clone(),
                    candidate_output: dual.candidate_result.as_ref().and_then(|c| c.output.clone()),
                    details: dual.divergence_details.clone(),
                    timestamp_epoch_seconds: now_epoch_seconds(),
                    trace_id: dual.result.trace_id.clone(),
                    inputs: input,
                };
                on_divergence(&report);
                divergences.push(report);
            } else {
                errors.push(DifferentialTestError {
                    node_id: node_id.to_string(),
                    oracle_error: dual.result.error.clone(),
                    candidate_error: dual.candidate_result.as_ref().and_then(|c| c.error.clone()),
                    trace_id: dual.result.trace_id.clone(),
                    inputs: input,
                });
            }
        }

        let failed = divergences.len() + errors.len();
        debug_assert_eq!(passed + failed, total);

        DifferentialTestResult {
            node_id: node_id.to_string(),
            total,
            passed,
            failed,
            divergences,
            errors,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Generator-driven variant: `count` inputs are produced by calling
    /// `generator(i)` for `i` in `0..count` (spec.md §2 allowance).
    pub async fn test_with_generator(
        &self,
        node_id: &str,
        count: usize,
        mut generator: impl FnMut(usize) -> OrderedMap,
        on_divergence: impl FnMut(&DivergenceReport),
    ) -> DifferentialTestResult {
        let inputs: Vec<OrderedMap> = (0..count).map(&mut generator).collect();
        self.test_node(node_id, inputs, on_divergence).await
    }

    /// Unifies fixed and generator-backed input sources behind one entry
    /// point for callers that accept either (spec.md §2).
    pub async fn test_with_source(
        &self,
        node_id: &str,
        source: InputSource<'_>,
        count_if_generator: usize,
        on_divergence: impl FnMut(&DivergenceReport),
    ) -> DifferentialTestResult {
        match source {
            InputSource::Fixed(inputs) => self.test_node(node_id, inputs, on_divergence).await,
            InputSource::Generator(mut generator) => {
                self.test_with_generator(node_id, count_if_generator, move |i| generator(i), on_divergence)
                    .await
            }
        }
    }
}

fn now_epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
