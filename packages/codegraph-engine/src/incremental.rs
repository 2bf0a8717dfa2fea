//! Incremental store: whole-file result cache keyed by content fingerprint
//!
//! Granularity is the file, not the technique. A fingerprint match reuses
//! every cached occurrence of the file and skips all of its per-file
//! techniques; a miss re-runs them and overwrites the entry. State written by
//! a different engine version is discarded wholesale.

use crate::fingerprint::Fingerprint;
use crate::model::{Occurrence, TechniqueMetric};
use chrono::{DateTime, Utc};
use codegraph_storage::{save_json, Persistence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Incremental state format version
pub const STATE_VERSION: u32 = 1;

/// Per-technique record inside a cache entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechniqueRunStats {
    pub count: usize,
    pub duration_ms: u64,
}

/// Cached results of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCacheEntry {
    /// Fingerprint of the content that produced `occurrences`
    pub fingerprint: Fingerprint,
    pub occurrences: Vec<Occurrence>,
    pub per_technique_metrics: BTreeMap<String, TechniqueRunStats>,
    pub last_run_at: DateTime<Utc>,
    pub reuse_count: u64,
}

impl FileCacheEntry {
    pub fn from_run(
        fingerprint: Fingerprint,
        occurrences: Vec<Occurrence>,
        metrics: &[TechniqueMetric],
    ) -> Self {
        let mut per_technique_metrics = BTreeMap::new();
        for metric in metrics {
            let stats: &mut TechniqueRunStats =
                per_technique_metrics.entry(metric.name.clone()).or_default();
            stats.count += metric.occurrence_count;
            stats.duration_ms += metric.duration_ms;
        }

        Self {
            fingerprint,
            occurrences,
            per_technique_metrics,
            last_run_at: Utc::now(),
            reuse_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalStats {
    pub total_reuses: u64,
    pub total_processed: u64,
    pub last_duration_ms: u64,
}

/// Persisted incremental state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalState {
    pub version: u32,
    pub files: BTreeMap<String, FileCacheEntry>,
    pub stats: IncrementalStats,
}

impl Default for IncrementalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            files: BTreeMap::new(),
            stats: IncrementalStats::default(),
        }
    }
}

impl IncrementalState {
    /// Cache entry for `path` only if it was produced from identical content
    pub fn lookup(&self, path: &str, fingerprint: &Fingerprint) -> Option<&FileCacheEntry> {
        self.files
            .get(path)
            .filter(|entry| entry.fingerprint.matches(fingerprint))
    }

    /// Mark a cache hit and hand back the cached occurrences
    pub fn record_reuse(&mut self, path: &str) -> Option<Vec<Occurrence>> {
        let entry = self.files.get_mut(path)?;
        entry.reuse_count += 1;
        self.stats.total_reuses += 1;
        Some(entry.occurrences.clone())
    }

    /// Replace the entry for `path` (never merged with the previous one)
    pub fn record_run(&mut self, path: impl Into<String>, entry: FileCacheEntry) {
        self.files.insert(path.into(), entry);
    }

    /// Drop the entry for `path`; returns whether one existed
    pub fn invalidate(&mut self, path: &str) -> bool {
        self.files.remove(path).is_some()
    }

    pub fn finish_run(&mut self, processed: usize, duration_ms: u64) {
        self.stats.total_processed += processed as u64;
        self.stats.last_duration_ms = duration_ms;
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Loads and saves `IncrementalState` through the persistence port
pub struct IncrementalStore {
    store: Arc<dyn Persistence>,
    path: PathBuf,
}

impl IncrementalStore {
    pub fn new(store: Arc<dyn Persistence>, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load prior state, starting cold on absence, corruption or version mismatch
    pub fn load(&self) -> IncrementalState {
        let bytes = match self.store.load_bytes(&self.path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("No incremental state at {}, starting cold", self.path.display());
                return IncrementalState::default();
            }
            Err(e) => {
                warn!("Failed to read incremental state {}: {}", self.path.display(), e);
                return IncrementalState::default();
            }
        };

        match serde_json::from_slice::<VersionProbe>(&bytes) {
            Ok(probe) if probe.version != STATE_VERSION => {
                warn!(
                    "Discarding incremental state {} (version {} != {})",
                    self.path.display(),
                    probe.version,
                    STATE_VERSION
                );
                return IncrementalState::default();
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Discarding corrupted incremental state {}: {}", self.path.display(), e);
                return IncrementalState::default();
            }
        }

        match serde_json::from_slice::<IncrementalState>(&bytes) {
            Ok(state) => {
                info!(
                    "Loaded incremental state ({}): {} files, {} total reuses",
                    self.store.name(),
                    state.files.len(),
                    state.stats.total_reuses
                );
                state
            }
            Err(e) => {
                warn!("Discarding corrupted incremental state {}: {}", self.path.display(), e);
                IncrementalState::default()
            }
        }
    }

    /// Drop the persisted state so the next run starts cold
    pub fn reset(&self) -> codegraph_storage::Result<()> {
        self.store.remove(&self.path)?;
        info!("Removed incremental state {}", self.path.display());
        Ok(())
    }

    /// Persist state atomically; failures are logged, never returned
    pub fn save(&self, state: &IncrementalState) -> bool {
        match save_json(self.store.as_ref(), &self.path, state) {
            Ok(()) => {
                debug!(
                    "Saved incremental state ({} files) to {}",
                    state.files.len(),
                    self.path.display()
                );
                true
            }
            Err(e) => {
                warn!("Failed to persist incremental state {}: {}", self.path.display(), e);
                false
            }
        }
    }
}
