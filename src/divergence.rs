// Divergence Store: bounded per-node history of observed divergences
// (spec.md §4.4). Grounded on the Python original's `DivergenceDatabase`
// (examples/original_source/python/vesper_verification/divergence.py), with
// the atomic snapshot write-then-rename grounded on the teacher's
// `SnapshotPromoter` persistence discipline (knhk-closed-loop/src/promoter.rs).

use crate::comparator::ComparisonReport;
use crate::value::OrderedMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_MAX_RECORDS_PER_NODE: usize = 1000;

/// One recorded divergence between oracle and candidate output (spec.md §3:
/// `{ id, node_id, inputs, oracle_output, candidate_output, structured_diff,
/// timestamp, mode_tag, metadata }`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DivergenceRecord {
    pub id: String,
    pub node_id: String,
    pub mode: String,
    pub trace_id: String,
    pub timestamp_epoch_seconds: f64,
    pub inputs: OrderedMap,
    pub oracle_output: Option<OrderedMap>,
    pub candidate_output: Option<OrderedMap>,
    pub structured_diff: Option<ComparisonReport>,
    pub metadata: HashMap<String, String>,
    pub oracle_error: bool,
    pub candidate_error: bool,
}

impl DivergenceRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn from_report(
        node_id: &str,
        mode: &str,
        inputs: OrderedMap,
        oracle_output: Option<OrderedMap>,
        candidate_output: Option<OrderedMap>,
        report: Option<&ComparisonReport>,
        oracle_error: bool,
        candidate_error: bool,
        metadata: HashMap<String, String>,
    ) -> Self {
        DivergenceRecord {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.to_string(),
            mode: mode.to_string(),
            trace_id: Uuid::new_v4().to_string(),
            timestamp_epoch_seconds: now_epoch_seconds(),
            inputs,
            oracle_output,
            candidate_output,
            structured_diff: report.cloned(),
            metadata,
            oracle_error,
            candidate_error,
        }
    }

    fn diff_paths(&self) -> impl Iterator<Item = &str> {
        self.structured_diff
            .iter()
            .flat_map(|r| r.differences.iter().map(|d| d.path.as_str()))
    }
}

/// Aggregate statistics over a node's retained divergence history.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DivergenceStats {
    pub total: usize,
    pub by_mode: HashMap<String, usize>,
    pub most_common_diff_paths: Vec<(String, usize)>,
}

struct Inner {
    records: HashMap<String, VecDeque<DivergenceRecord>>,
    max_records_per_node: usize,
}

/// Bounded, per-node ring buffer of divergence records with optional durable
/// snapshotting (spec.md §4.4, §6).
#[derive(Clone)]
pub struct DivergenceStore {
    inner: Arc<Mutex<Inner>>,
    storage_path: Option<PathBuf>,
}

impl DivergenceStore {
    pub fn new(max_records_per_node: usize) -> Self {
        DivergenceStore {
            inner: Arc::new(Mutex::new(Inner {
                records: HashMap::new(),
                max_records_per_node,
            })),
            storage_path: None,
        }
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn store(&self, record: DivergenceRecord) {
        let mut inner = self.inner.lock();
        let max = inner.max_records_per_node;
        let bucket = inner.records.entry(record.node_id.clone()).or_default();
        bucket.push_back(record);
        while bucket.len() > max {
            bucket.pop_front();
        }
    }

    /// Most recent first, offset/limit applied after reversal (spec.md §6).
    pub fn get_by_node(&self, node_id: &str, offset: usize, limit: usize) -> Vec<DivergenceRecord> {
        let inner = self.inner.lock();
        match inner.records.get(node_id) {
            Some(bucket) => bucket
                .iter()
                .rev()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn get_by_time_range(
        &self,
        node_id: &str,
        start_epoch_seconds: f64,
        end_epoch_seconds: f64,
    ) -> Vec<DivergenceRecord> {
        let inner = self.inner.lock();
        match inner.records.get(node_id) {
            Some(bucket) => bucket
                .iter()
                .filter(|r| {
                    r.timestamp_epoch_seconds >= start_epoch_seconds
                        && r.timestamp_epoch_seconds <= end_epoch_seconds
                })
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn get_stats(&self, node_id: &str) -> DivergenceStats {
        let inner = self.inner.lock();
        let bucket = match inner.records.get(node_id) {
            Some(b) => b,
            None => return DivergenceStats::default(),
        };

        let mut by_mode: HashMap<String, usize> = HashMap::new();
        let mut diff_counts: HashMap<String, usize> = HashMap::new();
        for record in bucket {
            *by_mode.entry(record.mode.clone()).or_insert(0) += 1;
            for path in record.diff_paths() {
                *diff_counts.entry(path.to_string()).or_insert(0) += 1;
            }
        }

        let mut most_common: Vec<(String, usize)> = diff_counts.into_iter().collect();
        most_common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_common.truncate(5);

        DivergenceStats {
            total: bucket.len(),
            by_mode,
            most_common_diff_paths: most_common,
        }
    }

    pub fn clear(&self, node_id: &str) {
        self.inner.lock().records.remove(node_id);
    }

    pub fn clear_all(&self) {
        self.inner.lock().records.clear();
    }

    /// Writes every node's history to `storage_path` via write-then-rename,
    /// so a crash mid-write never leaves a truncated file on disk.
    pub fn save_to_file(&self) -> std::io::Result<()> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };
        let snapshot: HashMap<String, Vec<DivergenceRecord>> = {
            let inner = self.inner.lock();
            inner
                .records
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                .collect()
        };
        write_atomic(path, &snapshot)
    }

    pub fn load_from_file(&self) -> std::io::Result<()> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(path)?;
        let snapshot: HashMap<String, Vec<DivergenceRecord>> =
            serde_json::from_str(&contents).map_err(std::io::Error::other)?;

        let mut inner = self.inner.lock();
        for (node_id, records) in snapshot {
            inner
                .records
                .insert(node_id, VecDeque::from(records));
        }
        Ok(())
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let serialized = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    std::fs::write(&tmp_path, serialized)?;
    std::fs::rename(&tmp_path, path)
}

fn now_epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
