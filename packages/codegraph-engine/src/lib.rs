/*
 * Codegraph Engine - Technique Execution Engine
 *
 * Runs pluggable analyzers (techniques) over a source snapshot and
 * returns structured findings (occurrences).
 *
 * Architecture:
 * - Technique contract + registry (name-addressed)
 * - Whole-file incremental cache (content fingerprints)
 * - Sequential executor (per-unit timeout, failure isolation)
 * - Worker pool (bounded batches, id-based technique dispatch)
 * - Metrics recorder (rolling run history)
 */

// Public modules
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod incremental;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod pool;
#[cfg(feature = "metrics")]
pub mod telemetry;
pub mod technique;
pub mod unit;

// Re-exports
pub use config::{ConfigError, EngineConfig, RunOptions};
pub use context::{AstHandle, EngineState, Environment, ExecutionContext, SourceParser};
pub use error::{EngineError, Result};
pub use executor::{FileRun, GlobalRun, SequentialExecutor};
pub use fingerprint::Fingerprint;
pub use incremental::{FileCacheEntry, IncrementalState, IncrementalStore, STATE_VERSION};
pub use metrics::{HistoryStore, MetricsHistory, MetricsRecorder, RunSummary, TechniqueTotals};
pub use model::{
    ExecutionResult, ExecutionStrategy, FileRecord, Level, Occurrence, Severity, TechniqueMetric,
    UnitCounts, ANALYZER_ERROR, WORKER_ERROR,
};
pub use orchestrator::Engine;
pub use pool::{PoolOptions, WorkerBatch, WorkerOutcome, WorkerPool};
pub use technique::{RegistryFactory, Technique, TechniqueInput, TechniqueRegistry};
pub use unit::{Unit, UnitState};

pub use codegraph_storage::{FsStore, MemoryStore, Persistence};
