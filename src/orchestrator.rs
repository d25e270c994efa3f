// Orchestrator: routes one request through oracle/candidate according to a
// `RoutingDecision`, in every mode, with a single uniform fallback policy
// (spec.md §4.7). Grounded on the Python original's `ExecutionOrchestrator`
// (examples/original_source/python/vesper_runtime/executor.py). Span
// instrumentation replaces the original's hand-rolled `ExecutionTracer`
// (vesper_runtime/tracing.py) with `tracing::instrument`, since `tracing` is
// already the teacher's observability crate (knhk-closed-loop/src/lib.rs).

use crate::comparator::{Comparator, ComparisonReport};
use crate::confidence::ConfidenceTracker;
use crate::divergence::{DivergenceRecord, DivergenceStore};
use crate::metrics::MetricsCollector;
use crate::node::{HandlerError, NodeId, Runtime};
use crate::routing::{ExecutionRouter, Mode, RoutingDecision};
use crate::shadow::ShadowExecutor;
use crate::value::OrderedMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of routing+executing a single node call (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub node_id: NodeId,
    pub mode: String,
    pub success: bool,
    pub output: Option<OrderedMap>,
    pub error: Option<String>,
    pub duration_ms: f64,
    pub trace_id: String,
}

impl ExecutionResult {
    fn ok(node_id: &str, mode: Mode, output: OrderedMap, duration_ms: f64) -> Self {
        ExecutionResult {
            node_id: node_id.to_string(),
            mode: format!("{:?}", mode),
            success: true,
            output: Some(output),
            error: None,
            duration_ms,
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    fn failed(node_id: &str, mode: Mode, error: impl Into<String>, duration_ms: f64) -> Self {
        ExecutionResult {
            node_id: node_id.to_string(),
            mode: format!("{:?}", mode),
            success: false,
            output: None,
            error: Some(error.into()),
            duration_ms,
            trace_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Outcome of a verified (dual-path) invocation: always carries the oracle
/// result to the caller, plus the comparison and the candidate's own result
/// for observability (spec.md §3, §4.7 "dual-verify" and "direct-only with
/// sampling").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DualExecutionResult {
    pub node_id: NodeId,
    pub result: ExecutionResult,
    pub candidate_result: Option<ExecutionResult>,
    pub diverged: bool,
    pub divergence_details: Option<ComparisonReport>,
}

pub struct Orchestrator {
    oracle: Runtime,
    candidate: Option<Runtime>,
    router: Option<ExecutionRouter>,
    comparator: Comparator,
    confidence_tracker: ConfidenceTracker,
    metrics: Option<MetricsCollector>,
    divergence_store: Option<DivergenceStore>,
    shadow_executor: Option<ShadowExecutor>,
}

impl Orchestrator {
    pub fn new(oracle: Runtime, confidence_tracker: ConfidenceTracker) -> Self {
        Orchestrator {
            oracle,
            candidate: None,
            router: None,
            comparator: Comparator::default(),
            confidence_tracker,
            metrics: None,
            divergence_store: None,
            shadow_executor: None,
        }
    }

    pub fn with_candidate(mut self, candidate: Runtime) -> Self {
        self.candidate = Some(candidate);
        self
    }

    pub fn with_router(mut self, router: ExecutionRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_divergence_store(mut self, store: DivergenceStore) -> Self {
        self.divergence_store = Some(store);
        self
    }

    pub fn with_shadow_executor(mut self, executor: ShadowExecutor) -> Self {
        self.shadow_executor = Some(executor);
        self
    }

    /// Routes and executes one request. Never returns an `Err` to the
    /// caller: any unhandled failure falls back to the oracle, and if the
    /// oracle also fails, a `success: false` `ExecutionResult` is returned
    /// (spec.md §4.7 uniform fallback policy, §7).
    #[instrument(skip(self, inputs), fields(node_id = %node_id))]
    pub async fn execute(
        &self,
        node_id: &str,
        inputs: &OrderedMap,
        forced_mode: Option<Mode>,
    ) -> ExecutionResult {
        let decision = self.decide(node_id, inputs, forced_mode);
        info!(node_id, mode = ?decision.mode, reason = %decision.reason, "routing decision");

        let (outcome, diverged) = match decision.mode {
            Mode::OracleOnly => (self.execute_oracle_only(node_id, inputs).await, false),
            Mode::Shadow => (self.execute_shadow_mode(node_id, inputs).await, false),
            Mode::Canary => (self.execute_canary(node_id, inputs, &decision).await, false),
            Mode::DualVerify => {
                let dual = self.execute_dual_verify(node_id, inputs).await;
                (dual.result, dual.diverged)
            }
            Mode::DirectOnly => self.execute_direct_only(node_id, inputs, &decision).await,
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_execution(
                node_id,
                outcome.duration_ms,
                diverged,
                !outcome.success,
                &outcome.mode,
            );
        }

        outcome
    }

    /// Always runs both paths and compares, regardless of routing band —
    /// used by differential testing and by direct-only's sampled
    /// verification draw (spec.md §4.8, §4.5).
    #[instrument(skip(self, inputs), fields(node_id = %node_id))]
    pub async fn execute_dual(&self, node_id: &str, inputs: &OrderedMap) -> DualExecutionResult {
        self.execute_dual_verify(node_id, inputs).await
    }

    fn decide(
        &self,
        node_id: &str,
        inputs: &OrderedMap,
        forced_mode: Option<Mode>,
    ) -> RoutingDecision {
        match &self.router {
            Some(router) => router.route(node_id, inputs, forced_mode),
            None => RoutingDecision::oracle_only("no router configured"),
        }
    }

    async fn execute_oracle_only(&self, node_id: &str, inputs: &OrderedMap) -> ExecutionResult {
        let start = Instant::now();
        match self.oracle.execute(node_id, inputs).await {
            Ok(output) => ExecutionResult::ok(node_id, Mode::OracleOnly, output, elapsed_ms(start)),
            Err(err) => ExecutionResult::failed(node_id, Mode::OracleOnly, err.to_string(), elapsed_ms(start)),
        }
    }

    async fn execute_shadow_mode(&self, node_id: &str, inputs: &OrderedMap) -> ExecutionResult {
        let result = self.execute_oracle_only(node_id, inputs).await;

        if let Some(shadow) = &self.shadow_executor {
            let oracle_output = if result.success {
                Ok(result.output.clone().unwrap_or_default())
            } else {
                Err(HandlerError::Failed(
                    result.error.clone().unwrap_or_default(),
                ))
            };
            shadow
                .execute_shadow(node_id, oracle_output, inputs.clone())
                .await;
        }

        result
    }

    async fn execute_canary(
        &self,
        node_id: &str,
        inputs: &OrderedMap,
        decision: &RoutingDecision,
    ) -> ExecutionResult {
        if !decision.use_candidate {
            return self.execute_oracle_only(node_id, inputs).await;
        }

        let Some(candidate) = &self.candidate else {
            warn!(node_id, "canary routed to candidate but none configured, falling back");
            return self.execute_oracle_only(node_id, inputs).await;
        };

        let start = Instant::now();
        match candidate.execute(node_id, inputs).await {
            Ok(output) => ExecutionResult::ok(node_id, Mode::Canary, output, elapsed_ms(start)),
            Err(err) => {
                warn!(node_id, error = %err, "canary candidate failed, falling back to oracle");
                self.execute_oracle_only(node_id, inputs).await
            }
        }
    }

    /// Invokes oracle and candidate concurrently, compares, records
    /// confidence and metrics for *both* paths, and stores any divergence
    /// (spec.md §4.7 "dual-verify": "record metrics for both"). Used
    /// directly by `execute_dual` and by direct-only's sampled verification.
    async fn execute_dual_verify(&self, node_id: &str, inputs: &OrderedMap) -> DualExecutionResult {
        let Some(candidate) = &self.candidate else {
            let result = self.execute_oracle_only(node_id, inputs).await;
            return DualExecutionResult {
                node_id: node_id.to_string(),
                result,
                candidate_result: None,
                diverged: false,
                divergence_details: None,
            };
        };

        let oracle_start = Instant::now();
        let candidate_start = Instant::now();
        let (oracle_raw, candidate_raw) =
            tokio::join!(self.oracle.execute(node_id, inputs), candidate.execute(node_id, inputs));
        let oracle_duration = elapsed_ms(oracle_start);
        let candidate_duration = elapsed_ms(candidate_start);

        let oracle_result = match &oracle_raw {
            Ok(output) => ExecutionResult::ok(node_id, Mode::DualVerify, output.clone(), oracle_duration),
            Err(err) => ExecutionResult::failed(node_id, Mode::DualVerify, err.to_string(), oracle_duration),
        };
        let candidate_result = match &candidate_raw {
            Ok(output) => ExecutionResult::ok(node_id, Mode::DualVerify, output.clone(), candidate_duration),
            Err(err) => ExecutionResult::failed(node_id, Mode::DualVerify, err.to_string(), candidate_duration),
        };

        let (diverged, report, oracle_error, candidate_error) = match (&oracle_raw, &candidate_raw) {
            (Ok(o), Ok(c)) => {
                let report = self.comparator.compare(o, c);
                (report.is_some(), report, false, false)
            }
            (Ok(_), Err(_)) => (true, None, false, true),
            (Err(_), Ok(_)) => (true, None, true, false),
            (Err(_), Err(_)) => (true, None, true, true),
        };

        self.confidence_tracker
            .record_execution(node_id, diverged, oracle_error, candidate_error);

        if let Some(metrics) = &self.metrics {
            metrics.record_execution(node_id, oracle_duration, diverged, oracle_error, "oracle");
            metrics.record_execution(node_id, candidate_duration, diverged, candidate_error, "candidate");
        }

        if diverged {
            warn!(node_id, "dual-verify divergence detected");
            if let Some(store) = &self.divergence_store {
                store.store(DivergenceRecord::from_report(
                    node_id,
                    "dual_verify",
                    inputs.clone(),
                    oracle_raw.as_ref().ok().cloned(),
                    candidate_raw.as_ref().ok().cloned(),
                    report.as_ref(),
                    oracle_error,
                    candidate_error,
                    HashMap::new(),
                ));
            }
        }

        DualExecutionResult {
            node_id: node_id.to_string(),
            result: oracle_result,
            candidate_result: Some(candidate_result),
            diverged,
            divergence_details: report,
        }
    }

    /// Direct-only: normally invokes the candidate alone. On the sampled
    /// verification draw it runs a full dual-verify but still returns the
    /// *candidate's* result to the caller, falling back to the oracle's only
    /// if the candidate itself failed (spec.md §4.7: "return candidate
    /// result... Returned: candidate or fallback oracle").
    async fn execute_direct_only(
        &self,
        node_id: &str,
        inputs: &OrderedMap,
        decision: &RoutingDecision,
    ) -> (ExecutionResult, bool) {
        if decision.verify_outputs {
            let dual = self.execute_dual_verify(node_id, inputs).await;
            let result = match dual.candidate_result {
                Some(candidate_result) if candidate_result.success => candidate_result,
                _ => dual.result,
            };
            return (result, dual.diverged);
        }

        let Some(candidate) = &self.candidate else {
            warn!(node_id, "direct-only routed but no candidate configured, falling back");
            return (self.execute_oracle_only(node_id, inputs).await, false);
        };

        let start = Instant::now();
        match candidate.execute(node_id, inputs).await {
            Ok(output) => (
                ExecutionResult::ok(node_id, Mode::DirectOnly, output, elapsed_ms(start)),
                false,
            ),
            Err(err) => {
                warn!(node_id, error = %err, "direct-only candidate failed, falling back to oracle");
                (self.execute_oracle_only(node_id, inputs).await, false)
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
