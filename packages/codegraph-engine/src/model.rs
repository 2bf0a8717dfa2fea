//! Core data model shared by every engine component

use crate::metrics::TechniqueTotals;
use crate::unit::UnitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Occurrence kind for a technique that returned an error or panicked/timed out
pub const ANALYZER_ERROR: &str = "analyzer-error";

/// Occurrence kind for a worker batch that crashed
pub const WORKER_ERROR: &str = "worker-error";

/// Origin recorded on occurrences produced by the pool itself
pub const WORKER_POOL_ORIGIN: &str = "worker-pool";

const TIMEOUT_TAG: &str = "[timeout]";
const EXCEPTION_TAG: &str = "[exception]";

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Reporting level (how loudly a renderer should surface the finding)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Note,
    Warning,
    Error,
}

/// One structured finding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occurrence {
    pub kind: String,
    pub severity: Severity,
    pub level: Level,
    /// Relative path of the file, empty for project-wide findings
    pub path: String,
    /// 1-based line, 0 when the finding is not tied to a line
    pub line: u32,
    pub message: String,
    /// Name of the producing technique
    pub origin: String,
}

impl Occurrence {
    /// New finding with `Medium`/`Warning` defaults; `origin` is stamped by the engine
    pub fn new(
        kind: impl Into<String>,
        path: impl Into<String>,
        line: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            severity: Severity::Medium,
            level: Level::Warning,
            path: path.into(),
            line,
            message: message.into(),
            origin: String::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub(crate) fn with_origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self
    }

    /// Synthetic finding for a technique that failed or panicked
    pub fn analyzer_exception(technique: &str, path: &str, error: &str) -> Self {
        Self::new(
            ANALYZER_ERROR,
            path,
            0,
            format!(
                "{} Technique '{}' failed on {}: {}",
                EXCEPTION_TAG,
                technique,
                display_path(path),
                error
            ),
        )
        .with_severity(Severity::Low)
        .with_level(Level::Error)
        .with_origin(technique)
    }

    /// Synthetic finding for a technique that exceeded its time budget
    pub fn analyzer_timeout(technique: &str, path: &str, timeout_ms: u64) -> Self {
        Self::new(
            ANALYZER_ERROR,
            path,
            0,
            format!(
                "{} Technique '{}' exceeded {}ms on {}",
                TIMEOUT_TAG,
                technique,
                timeout_ms,
                display_path(path)
            ),
        )
        .with_severity(Severity::Low)
        .with_level(Level::Error)
        .with_origin(technique)
    }

    /// Synthetic finding for a worker batch that crashed
    pub fn worker_failure(batch_id: usize, first_path: &str, file_count: usize, error: &str) -> Self {
        Self::new(
            WORKER_ERROR,
            first_path,
            0,
            format!(
                "Worker for batch {} ({} files) failed: {}",
                batch_id, file_count, error
            ),
        )
        .with_severity(Severity::Medium)
        .with_level(Level::Error)
        .with_origin(WORKER_POOL_ORIGIN)
    }

    pub fn is_analyzer_error(&self) -> bool {
        self.kind == ANALYZER_ERROR
    }

    pub fn is_timeout(&self) -> bool {
        self.is_analyzer_error() && self.message.starts_with(TIMEOUT_TAG)
    }

    pub fn is_worker_error(&self) -> bool {
        self.kind == WORKER_ERROR
    }
}

/// Target of a unit in messages: its path, or `<global>`
pub(crate) fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<global>"
    } else {
        path
    }
}

/// A file as produced by the scanner collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Relative, normalized path (unique within a run)
    pub path: String,
    pub full_path: PathBuf,
    /// `None` when the scanner could not read the file
    pub content: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, full_path: impl Into<PathBuf>, content: Option<String>) -> Self {
        Self {
            path: path.into(),
            full_path: full_path.into(),
            content,
            last_modified: Utc::now(),
        }
    }

    /// Record rooted at `base_dir` with in-memory content
    pub fn with_content(base_dir: &std::path::Path, path: &str, content: impl Into<String>) -> Self {
        Self::new(path, base_dir.join(path), Some(content.into()))
    }

    /// File kind derived from the extension (`"rs"`, `"ts"`, ...), empty if none
    pub fn file_kind(&self) -> &str {
        std::path::Path::new(&self.path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
    }
}

/// One technique invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechniqueMetric {
    pub name: String,
    pub duration_ms: u64,
    pub occurrence_count: usize,
    pub is_global: bool,
}

/// Terminal unit counts for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCounts {
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Per-file units not executed because the file was a cache hit
    pub skipped: usize,
}

impl UnitCounts {
    /// Count one unit that reached a terminal state
    pub fn record(&mut self, state: UnitState) {
        match state {
            UnitState::Completed => self.completed += 1,
            UnitState::Failed => self.failed += 1,
            UnitState::TimedOut => self.timed_out += 1,
            UnitState::Skipped => self.skipped += 1,
            UnitState::Pending | UnitState::Running => {}
        }
    }

    pub fn merge(&mut self, other: &UnitCounts) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.skipped += other.skipped;
    }

    pub fn executed(&self) -> usize {
        self.completed + self.failed + self.timed_out
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.timed_out > 0
    }
}

/// How per-file units were executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Sequential,
    WorkerPool,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::WorkerPool => "worker_pool",
        }
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The value returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub total_files: usize,
    /// Files covered by this run (executed or reused), in input order
    pub analyzed_paths: Vec<String>,
    /// Files whose occurrences came from the incremental store
    pub reused_files: usize,
    pub occurrences: Vec<Occurrence>,
    /// Run start, milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub duration_ms: u64,
    /// Per-technique totals, omitted in compact mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<TechniqueTotals>>,
    pub strategy: ExecutionStrategy,
    pub units: UnitCounts,
}

impl ExecutionResult {
    pub fn occurrences_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Occurrence> + 'a {
        self.occurrences.iter().filter(move |o| o.path == path)
    }

    pub fn error_count(&self) -> usize {
        self.occurrences
            .iter()
            .filter(|o| o.is_analyzer_error() || o.is_worker_error())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_and_exception_are_distinguishable() {
        let timeout = Occurrence::analyzer_timeout("slow", "src/a.rs", 50);
        let failure = Occurrence::analyzer_exception("broken", "src/a.rs", "boom");

        assert!(timeout.is_analyzer_error());
        assert!(timeout.is_timeout());
        assert!(failure.is_analyzer_error());
        assert!(!failure.is_timeout());
        assert_eq!(timeout.origin, "slow");
        assert_eq!(failure.origin, "broken");
        assert!(failure.message.contains("boom"));
    }

    #[test]
    fn test_global_target_display() {
        let occ = Occurrence::analyzer_exception("graph", "", "missing root");
        assert!(occ.message.contains("<global>"));
        assert!(occ.path.is_empty());
    }

    #[test]
    fn test_worker_failure() {
        let occ = Occurrence::worker_failure(3, "src/a.rs", 10, "panicked");
        assert!(occ.is_worker_error());
        assert_eq!(occ.origin, WORKER_POOL_ORIGIN);
        assert!(occ.message.contains("batch 3"));
    }

    #[test]
    fn test_file_kind() {
        let file = FileRecord::new("src/lib.rs", "/repo/src/lib.rs", None);
        assert_eq!(file.file_kind(), "rs");

        let no_ext = FileRecord::new("Makefile", "/repo/Makefile", None);
        assert_eq!(no_ext.file_kind(), "");
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    #[test]
    fn test_unit_counts_merge() {
        let mut a = UnitCounts {
            completed: 2,
            failed: 1,
            timed_out: 0,
            skipped: 3,
        };
        a.merge(&UnitCounts {
            completed: 1,
            failed: 0,
            timed_out: 1,
            skipped: 0,
        });

        assert_eq!(a.executed(), 5);
        assert_eq!(a.skipped, 3);
    }
}
