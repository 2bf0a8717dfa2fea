//! Metrics recorder and rolling run history
//!
//! Every executed unit appends one `TechniqueMetric`; skipped units append
//! nothing. At run end the recorder folds them into per-technique totals and
//! a `RunSummary` is appended to a capped on-disk history. History
//! persistence is best-effort: failures are logged and swallowed.

use crate::model::{ExecutionStrategy, TechniqueMetric, UnitCounts};
use chrono::{DateTime, Utc};
use codegraph_storage::{load_json, save_json, Persistence};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// On-disk history format version
pub const HISTORY_VERSION: u32 = 1;

/// Default number of run summaries kept on disk
pub const DEFAULT_HISTORY_CAP: usize = 200;

/// Aggregated totals for one technique over a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechniqueTotals {
    pub name: String,
    pub invocations: usize,
    pub total_duration_ms: u64,
    pub total_occurrences: usize,
    pub is_global: bool,
}

/// Collects per-invocation metrics for one run
#[derive(Debug, Default, Clone)]
pub struct MetricsRecorder {
    metrics: Vec<TechniqueMetric>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, metric: TechniqueMetric) {
        self.metrics.push(metric);
    }

    pub fn extend(&mut self, metrics: impl IntoIterator<Item = TechniqueMetric>) {
        self.metrics.extend(metrics);
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn metrics(&self) -> &[TechniqueMetric] {
        &self.metrics
    }

    /// Per-technique totals, ordered by first invocation
    pub fn totals(&self) -> Vec<TechniqueTotals> {
        let mut order: Vec<TechniqueTotals> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for metric in &self.metrics {
            let pos = *index.entry(metric.name.as_str()).or_insert_with(|| {
                order.push(TechniqueTotals {
                    name: metric.name.clone(),
                    invocations: 0,
                    total_duration_ms: 0,
                    total_occurrences: 0,
                    is_global: metric.is_global,
                });
                order.len() - 1
            });

            let totals = &mut order[pos];
            totals.invocations += 1;
            totals.total_duration_ms += metric.duration_ms;
            totals.total_occurrences += metric.occurrence_count;
        }

        order
    }
}

/// One entry of the rolling history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub strategy: ExecutionStrategy,
    pub total_files: usize,
    pub executed_files: usize,
    pub reused_files: usize,
    pub occurrence_count: usize,
    pub units: UnitCounts,
    pub techniques: Vec<TechniqueTotals>,
}

/// Ring buffer of run summaries, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsHistory {
    pub version: u32,
    pub runs: VecDeque<RunSummary>,
}

impl Default for MetricsHistory {
    fn default() -> Self {
        Self {
            version: HISTORY_VERSION,
            runs: VecDeque::new(),
        }
    }
}

impl MetricsHistory {
    /// Append and evict the oldest entries beyond `cap`; returns evicted count
    pub fn push(&mut self, summary: RunSummary, cap: usize) -> usize {
        self.runs.push_back(summary);
        let mut evicted = 0;
        while self.runs.len() > cap.max(1) {
            self.runs.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn latest(&self) -> Option<&RunSummary> {
        self.runs.back()
    }
}

/// Persists the rolling history through the persistence port
pub struct HistoryStore {
    store: Arc<dyn Persistence>,
    path: PathBuf,
    cap: usize,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn Persistence>, path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            store,
            path: path.into(),
            cap,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load history; unreadable or foreign-version history starts empty
    pub fn load(&self) -> MetricsHistory {
        match load_json::<MetricsHistory>(self.store.as_ref(), &self.path) {
            Ok(Some(history)) if history.version == HISTORY_VERSION => history,
            Ok(Some(history)) => {
                warn!(
                    "Discarding metrics history {} (version {} != {})",
                    self.path.display(),
                    history.version,
                    HISTORY_VERSION
                );
                MetricsHistory::default()
            }
            Ok(None) => MetricsHistory::default(),
            Err(e) => {
                warn!("Discarding unreadable metrics history {}: {}", self.path.display(), e);
                MetricsHistory::default()
            }
        }
    }

    /// Append one summary and rewrite the file; never fails the caller
    ///
    /// Returns the history length after the append, `None` if the write failed.
    pub fn append(&self, summary: RunSummary) -> Option<usize> {
        let mut history = self.load();
        let evicted = history.push(summary, self.cap);
        if evicted > 0 {
            debug!("Evicted {} oldest run summaries (cap {})", evicted, self.cap);
        }

        match save_json(self.store.as_ref(), &self.path, &history) {
            Ok(()) => Some(history.len()),
            Err(e) => {
                warn!("Failed to persist metrics history {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegraph_storage::MemoryStore;
    use proptest::prelude::*;

    fn metric(name: &str, duration_ms: u64, occurrence_count: usize) -> TechniqueMetric {
        TechniqueMetric {
            name: name.to_string(),
            duration_ms,
            occurrence_count,
            is_global: false,
        }
    }

    fn summary(total_files: usize) -> RunSummary {
        RunSummary {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            duration_ms: 5,
            strategy: ExecutionStrategy::Sequential,
            total_files,
            executed_files: total_files,
            reused_files: 0,
            occurrence_count: 0,
            units: UnitCounts::default(),
            techniques: Vec::new(),
        }
    }

    #[test]
    fn test_totals_aggregate_in_first_seen_order() {
        let mut recorder = MetricsRecorder::new();
        recorder.record(metric("b", 10, 1));
        recorder.record(metric("a", 5, 0));
        recorder.record(metric("b", 20, 2));

        let totals = recorder.totals();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].name, "b");
        assert_eq!(totals[0].invocations, 2);
        assert_eq!(totals[0].total_duration_ms, 30);
        assert_eq!(totals[0].total_occurrences, 3);
        assert_eq!(totals[1].name, "a");
        assert_eq!(totals[1].invocations, 1);
    }

    #[test]
    fn test_history_append_and_reload() {
        let store = Arc::new(MemoryStore::new());
        let history = HistoryStore::new(store.clone(), "/repo/.codegraph/metrics-history.json", 3);

        assert!(history.load().is_empty());
        for n in 0..5 {
            history.append(summary(n));
        }

        let loaded = history.load();
        assert_eq!(loaded.len(), 3);
        let totals: Vec<_> = loaded.runs.iter().map(|r| r.total_files).collect();
        assert_eq!(totals, vec![2, 3, 4]);
        assert_eq!(loaded.latest().unwrap().total_files, 4);
    }

    #[test]
    fn test_corrupted_history_starts_fresh() {
        let store = Arc::new(MemoryStore::new());
        let path = Path::new("/repo/history.json");
        store.save_bytes(path, b"{ not json").unwrap();

        let history = HistoryStore::new(store.clone(), path, 10);
        assert!(history.load().is_empty());
        assert_eq!(history.append(summary(1)), Some(1));
    }

    #[test]
    fn test_foreign_version_discarded() {
        let store = Arc::new(MemoryStore::new());
        let path = Path::new("/repo/history.json");
        let old = MetricsHistory {
            version: HISTORY_VERSION + 1,
            runs: VecDeque::from(vec![summary(1)]),
        };
        save_json(store.as_ref(), path, &old).unwrap();

        let history = HistoryStore::new(store, path, 10);
        assert!(history.load().is_empty());
    }

    proptest! {
        #[test]
        fn prop_history_never_exceeds_cap(cap in 1usize..20, runs in 0usize..60) {
            let mut history = MetricsHistory::default();
            for n in 0..runs {
                history.push(summary(n), cap);
            }

            prop_assert_eq!(history.len(), runs.min(cap));
            // Survivors are the most recent runs, oldest first
            let kept: Vec<_> = history.runs.iter().map(|r| r.total_files).collect();
            let expected: Vec<_> = (runs.saturating_sub(cap)..runs).collect();
            prop_assert_eq!(kept, expected);
        }
    }
}
