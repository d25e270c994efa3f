// Metrics Aggregator: per-node execution samples, percentiles, and export
// (spec.md §4.3). Grounded on the Python original's `MetricsCollector`
// (examples/original_source/python/vesper_verification/metrics.py), with
// the bounded recent-samples ring grounded on the teacher's divergence-style
// capped collections in knhk-closed-loop/src/shadow.rs.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const MAX_EXECUTIONS_PER_NODE: usize = 10_000;

/// One recorded execution, enough to compute latency percentiles and error
/// rates without retaining the actual inputs/outputs (spec.md §4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionSample {
    pub duration_ms: f64,
    pub diverged: bool,
    pub error: bool,
    pub path: String,
}

/// Per-path rollup: execution count and a running average duration, so
/// callers can tell the oracle's latency apart from the candidate's
/// (spec.md §3 AggregateMetrics "moving averages for duration per path").
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PathMetrics {
    pub path: String,
    pub executions: u64,
    pub avg_duration_ms: f64,
}

/// Rolled-up view for one node, derived from its retained samples.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregateMetrics {
    pub node_id: String,
    pub total_executions: u64,
    pub total_errors: u64,
    pub total_divergences: u64,
    pub oracle_executions: u64,
    pub candidate_executions: u64,
    pub path_breakdown: Vec<PathMetrics>,
    pub p50_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub p99_duration_ms: f64,
}

impl AggregateMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_executions as f64
        }
    }

    pub fn divergence_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.total_divergences as f64 / self.total_executions as f64
        }
    }
}

#[derive(Default)]
struct PathState {
    executions: u64,
    total_duration_ms: f64,
}

#[derive(Default)]
struct NodeState {
    samples: std::collections::VecDeque<ExecutionSample>,
    total_executions: u64,
    total_errors: u64,
    total_divergences: u64,
    path_stats: HashMap<String, PathState>,
}

/// Collects per-node execution samples and derives aggregates, a Prometheus
/// text export, and a JSON export (spec.md §4.3, §6).
#[derive(Clone, Default)]
pub struct MetricsCollector {
    nodes: Arc<Mutex<HashMap<String, NodeState>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        MetricsCollector {
            nodes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn record_execution(
        &self,
        node_id: &str,
        duration_ms: f64,
        diverged: bool,
        error: bool,
        path: &str,
    ) {
        let mut nodes = self.nodes.lock();
        let state = nodes.entry(node_id.to_string()).or_default();

        state.total_executions += 1;
        if error {
            state.total_errors += 1;
        }
        if diverged {
            state.total_divergences += 1;
        }

        let path_state = state.path_stats.entry(path.to_string()).or_default();
        path_state.executions += 1;
        path_state.total_duration_ms += duration_ms;

        state.samples.push_back(ExecutionSample {
            duration_ms,
            diverged,
            error,
            path: path.to_string(),
        });
        if state.samples.len() > MAX_EXECUTIONS_PER_NODE {
            state.samples.pop_front();
        }
    }

    pub fn get_aggregate_metrics(&self, node_id: &str) -> Option<AggregateMetrics> {
        let nodes = self.nodes.lock();
        let state = nodes.get(node_id)?;

        let mut durations: Vec<f64> = state.samples.iter().map(|s| s.duration_ms).collect();
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let mut path_breakdown: Vec<PathMetrics> = state
            .path_stats
            .iter()
            .map(|(path, stats)| PathMetrics {
                path: path.clone(),
                executions: stats.executions,
                avg_duration_ms: stats.total_duration_ms / stats.executions as f64,
            })
            .collect();
        path_breakdown.sort_by(|a, b| a.path.cmp(&b.path));

        let oracle_executions = state
            .path_stats
            .get("oracle")
            .map(|s| s.executions)
            .unwrap_or(0);
        let candidate_executions = state
            .path_stats
            .get("candidate")
            .map(|s| s.executions)
            .unwrap_or(0);

        Some(AggregateMetrics {
            node_id: node_id.to_string(),
            total_executions: state.total_executions,
            total_errors: state.total_errors,
            total_divergences: state.total_divergences,
            oracle_executions,
            candidate_executions,
            path_breakdown,
            p50_duration_ms: percentile(&durations, 0.50),
            p95_duration_ms: percentile(&durations, 0.95),
            p99_duration_ms: percentile(&durations, 0.99),
        })
    }

    pub fn get_all_aggregates(&self) -> Vec<AggregateMetrics> {
        let node_ids: Vec<String> = self.nodes.lock().keys().cloned().collect();
        node_ids
            .into_iter()
            .filter_map(|id| self.get_aggregate_metrics(&id))
            .collect()
    }

    pub fn get_recent_executions(&self, node_id: &str, limit: usize) -> Vec<ExecutionSample> {
        let nodes = self.nodes.lock();
        match nodes.get(node_id) {
            Some(state) => state
                .samples
                .iter()
                .rev()
                .take(limit)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Prometheus text-format exposition (spec.md §6 External Interfaces).
    /// `executions_total` carries both `node` and `path` labels (spec.md:111)
    /// so oracle and candidate throughput can be told apart per node.
    pub fn export_prometheus_metrics(&self) -> String {
        let mut out = String::new();
        out.push_str("# HELP vesper_executions_total Total executions observed per node and path\n");
        out.push_str("# TYPE vesper_executions_total counter\n");
        for agg in self.get_all_aggregates() {
            for path in &agg.path_breakdown {
                out.push_str(&format!(
                    "vesper_executions_total{{node_id=\"{}\",path=\"{}\"}} {}\n",
                    agg.node_id, path.path, path.executions
                ));
            }
        }

        out.push_str("# HELP vesper_errors_total Total errors observed per node\n");
        out.push_str("# TYPE vesper_errors_total counter\n");
        for agg in self.get_all_aggregates() {
            out.push_str(&format!(
                "vesper_errors_total{{node_id=\"{}\"}} {}\n",
                agg.node_id, agg.total_errors
            ));
        }

        out.push_str("# HELP vesper_divergences_total Total divergences observed per node\n");
        out.push_str("# TYPE vesper_divergences_total counter\n");
        for agg in self.get_all_aggregates() {
            out.push_str(&format!(
                "vesper_divergences_total{{node_id=\"{}\"}} {}\n",
                agg.node_id, agg.total_divergences
            ));
        }

        out.push_str("# HELP vesper_duration_ms_p99 99th percentile execution duration in ms\n");
        out.push_str("# TYPE vesper_duration_ms_p99 gauge\n");
        for agg in self.get_all_aggregates() {
            out.push_str(&format!(
                "vesper_duration_ms_p99{{node_id=\"{}\"}} {}\n",
                agg.node_id, agg.p99_duration_ms
            ));
        }

        out
    }

    pub fn export_json(&self) -> serde_json::Value {
        serde_json::json!({
            "nodes": self.get_all_aggregates(),
        })
    }

    pub fn reset(&self) {
        self.nodes.lock().clear();
    }
}

fn percentile(sorted: &[f64], fraction: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * fraction) as usize;
    let idx = idx.min(sorted.len() - 1);
    sorted[idx]
}
