// Shadow Executor: fire-and-forget background candidate execution that
// never affects the caller's response (spec.md §4.6). Grounded on the
// Python original's `ShadowExecutor` (examples/original_source/python/
// vesper_verification/shadow_mode.py). The original tracks pending work as
// a `set[asyncio.Task]` with a done-callback; this rendition uses
// `tokio::task::JoinSet`, the idiomatic bounded-concurrent-task-set type
// for a cooperative-async runtime, matching the teacher's preference for
// task-set abstractions over hand-rolled bookkeeping
// (knhk-closed-loop/src/shadow.rs used `rayon` for its own, unrelated,
// CPU-bound parallel test execution — this module keeps the teacher's
// instinct to reach for a crate-provided task-set rather than a bespoke one).

use crate::comparator::Comparator;
use crate::confidence::ConfidenceTracker;
use crate::divergence::{DivergenceRecord, DivergenceStore};
use crate::metrics::MetricsCollector;
use crate::node::{HandlerError, Runtime};
use crate::value::OrderedMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::warn;

pub const DEFAULT_MAX_IN_FLIGHT_SHADOWS: usize = 1024;

#[derive(Clone, Debug)]
pub struct ShadowExecutorConfig {
    pub max_in_flight_shadows: usize,
}

impl Default for ShadowExecutorConfig {
    fn default() -> Self {
        ShadowExecutorConfig {
            max_in_flight_shadows: DEFAULT_MAX_IN_FLIGHT_SHADOWS,
        }
    }
}

/// Runs the candidate in the background after the oracle result has already
/// been returned to the caller; divergences are recorded but never surfaced
/// as an error to whoever called `execute_shadow` (spec.md §4.6 invariant:
/// "the caller's response time and result are unaffected by the candidate").
pub struct ShadowExecutor {
    candidate: Runtime,
    comparator: Comparator,
    confidence_tracker: ConfidenceTracker,
    metrics: Option<MetricsCollector>,
    divergence_store: Option<DivergenceStore>,
    config: ShadowExecutorConfig,
    tasks: AsyncMutex<JoinSet<()>>,
    dropped_count: AtomicU64,
}

impl ShadowExecutor {
    pub fn new(candidate: Runtime, comparator: Comparator, confidence_tracker: ConfidenceTracker) -> Self {
        ShadowExecutor {
            candidate,
            comparator,
            confidence_tracker,
            metrics: None,
            divergence_store: None,
            config: ShadowExecutorConfig::default(),
            tasks: AsyncMutex::new(JoinSet::new()),
            dropped_count: AtomicU64::new(0),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_divergence_store(mut self, store: DivergenceStore) -> Self {
        self.divergence_store = Some(store);
        self
    }

    pub fn with_config(mut self, config: ShadowExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of candidate invocations dropped due to the in-flight bound
    /// being reached (spec.md §5 backpressure policy).
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub async fn pending_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Non-blocking: spawns the candidate call and returns immediately.
    /// Applies backpressure by dropping the shadow call (and counting the
    /// drop) once `max_in_flight_shadows` is reached, rather than queuing
    /// unboundedly (spec.md §5).
    pub async fn execute_shadow(
        &self,
        node_id: &str,
        oracle_output: Result<OrderedMap, HandlerError>,
        inputs: OrderedMap,
    ) {
        let mut tasks = self.tasks.lock().await;

        // Opportunistically reap finished tasks so long-running processes
        // don't accumulate JoinHandles for work that already completed.
        while tasks.try_join_next().is_some() {}

        if tasks.len() >= self.config.max_in_flight_shadows {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
            warn!(node_id, "shadow execution dropped: in-flight bound reached");
            return;
        }

        let candidate = self.candidate.clone();
        let comparator = self.comparator.clone();
        let confidence_tracker = self.confidence_tracker.clone();
        let metrics = self.metrics.clone();
        let divergence_store = self.divergence_store.clone();
        let node_id = node_id.to_string();

        tasks.spawn(async move {
            run_shadow_task(
                &node_id,
                &candidate,
                &comparator,
                &confidence_tracker,
                metrics.as_ref(),
                divergence_store.as_ref(),
                oracle_output,
                &inputs,
            )
            .await;
        });
    }

    /// Waits for in-flight shadow work to drain, up to `timeout`. Returns
    /// the number of tasks that were pending before the wait began, mirroring
    /// the Python original's `wait_for_pending` return contract.
    pub async fn await_pending(&self, timeout: Duration) -> usize {
        let pending_before = self.pending_count().await;
        let mut tasks = self.tasks.lock().await;
        let deadline = Instant::now() + timeout;

        loop {
            if tasks.is_empty() {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, tasks.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => break,
            }
        }

        pending_before
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_shadow_task(
    node_id: &str,
    candidate: &Runtime,
    comparator: &Comparator,
    confidence_tracker: &ConfidenceTracker,
    metrics: Option<&MetricsCollector>,
    divergence_store: Option<&DivergenceStore>,
    oracle_output: Result<OrderedMap, HandlerError>,
    inputs: &OrderedMap,
) {
    let start = Instant::now();
    let candidate_output = candidate.execute(node_id, inputs).await;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let (diverged, candidate_error, oracle_error, report) = match (&oracle_output, &candidate_output) {
        (Ok(oracle), Ok(candidate)) => {
            let report = comparator.compare(oracle, candidate);
            (report.is_some(), false, false, report)
        }
        (Ok(_), Err(err)) => {
            warn!(node_id, error = %err, "shadow candidate execution failed");
            (true, true, false, None)
        }
        (Err(err), Ok(_)) => {
            warn!(node_id, error = %err, "shadow oracle execution failed");
            (true, false, true, None)
        }
        (Err(oracle_err), Err(candidate_err)) => {
            warn!(node_id, oracle_error = %oracle_err, candidate_error = %candidate_err, "shadow execution failed on both paths");
            (true, true, true, None)
        }
    };

    confidence_tracker.record_execution(node_id, diverged, oracle_error, candidate_error);

    if let Some(metrics) = metrics {
        metrics.record_execution(node_id, duration_ms, diverged, candidate_error, "shadow");
    }

    if diverged {
        if let Some(store) = divergence_store {
            store.store(DivergenceRecord::from_report(
                node_id,
                "shadow",
                inputs.clone(),
                oracle_output.as_ref().ok().cloned(),
                candidate_output.as_ref().ok().cloned(),
                report.as_ref(),
                oracle_error,
                candidate_error,
                std::collections::HashMap::new(),
            ));
        }
    }
}
