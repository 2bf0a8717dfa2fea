//! Worker pool
//!
//! Files are cut into fixed-size batches and each batch runs on one worker of
//! a bounded rayon pool. Workers never receive technique objects: each one
//! rebuilds the registry from the `RegistryFactory`, resolves the batch's
//! technique names, and drives the sequential executor on its own
//! single-threaded tokio runtime with its own `EngineState`.
//!
//! A worker that fails outside technique code (registry construction, name
//! resolution, runtime start, a panic) yields one `worker-error` outcome for
//! its batch; the remaining batches are unaffected. Outcomes arrive over a
//! channel in completion order, which is arbitrary.

use crate::config::{
    default_max_workers, DEFAULT_BATCH_SIZE, DEFAULT_STACK_SIZE_MB, DEFAULT_TIMEOUT_MS,
};
use crate::context::{EngineState, ExecutionContext, SourceParser};
use crate::error::{EngineError, Result};
use crate::executor::{panic_message, FileRun, SequentialExecutor};
use crate::model::{FileRecord, Occurrence, TechniqueMetric};
use crate::technique::{RegistryFactory, TechniqueRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Pool sizing and per-technique timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    pub max_workers: usize,
    pub batch_size: usize,
    /// Per-technique timeout applied inside workers, 0 disables
    pub timeout_ms: u64,
    pub stack_size_mb: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            stack_size_mb: DEFAULT_STACK_SIZE_MB,
        }
    }
}

/// Files assigned to one worker invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerBatch {
    pub batch_id: usize,
    pub files: Vec<FileRecord>,
    /// Per-file techniques to resolve against the worker's registry
    pub technique_names: Vec<String>,
    pub timeout_ms: u64,
}

impl WorkerBatch {
    fn first_path(&self) -> &str {
        self.files.first().map(|f| f.path.as_str()).unwrap_or("")
    }
}

/// What one worker sends back
#[derive(Debug, Clone, Default)]
pub struct WorkerOutcome {
    pub batch_id: usize,
    /// One run per file, in batch order (empty when the worker failed)
    pub file_runs: Vec<FileRun>,
    pub processed_count: usize,
    /// Messages of units that failed or timed out inside the batch
    pub errors: Vec<String>,
    /// Set when the worker itself failed
    pub failure: Option<Occurrence>,
    /// Paths of the batch, kept so a failed batch can still be accounted for
    pub paths: Vec<String>,
}

impl WorkerOutcome {
    fn failed(batch: &WorkerBatch, error: &str) -> Self {
        Self {
            batch_id: batch.batch_id,
            failure: Some(Occurrence::worker_failure(
                batch.batch_id,
                batch.first_path(),
                batch.files.len(),
                error,
            )),
            errors: vec![error.to_string()],
            paths: batch.files.iter().map(|f| f.path.clone()).collect(),
            ..Default::default()
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// All occurrences of the batch in file order
    pub fn occurrences(&self) -> impl Iterator<Item = &Occurrence> + '_ {
        self.failure
            .iter()
            .chain(self.file_runs.iter().flat_map(|r| r.occurrences.iter()))
    }

    pub fn metrics(&self) -> impl Iterator<Item = &TechniqueMetric> + '_ {
        self.file_runs.iter().flat_map(|r| r.metrics.iter())
    }
}

/// Bounded parallel executor for per-file techniques
pub struct WorkerPool {
    options: PoolOptions,
    factory: RegistryFactory,
    parser: Option<Arc<dyn SourceParser>>,
    verbose: bool,
}

impl WorkerPool {
    pub fn new(options: PoolOptions, factory: RegistryFactory) -> Self {
        Self {
            options,
            factory,
            parser: None,
            verbose: false,
        }
    }

    pub fn with_parser(mut self, parser: Option<Arc<dyn SourceParser>>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Split `files` into batches of at most `batch_size`, preserving order
    pub fn batches(&self, files: &[FileRecord], technique_names: &[String]) -> Vec<WorkerBatch> {
        files
            .chunks(self.options.batch_size.max(1))
            .enumerate()
            .map(|(batch_id, chunk)| WorkerBatch {
                batch_id,
                files: chunk.to_vec(),
                technique_names: technique_names.to_vec(),
                timeout_ms: self.options.timeout_ms,
            })
            .collect()
    }

    /// Run all batches; returns one outcome per batch in completion order
    ///
    /// Fails only when the pool itself cannot start.
    pub async fn run(
        &self,
        files: &[FileRecord],
        technique_names: &[String],
        ctx: Arc<ExecutionContext>,
    ) -> Result<Vec<WorkerOutcome>> {
        let batches = self.batches(files, technique_names);
        if batches.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self.options.max_workers.max(1).min(batches.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("codegraph-worker-{}", i))
            .stack_size(self.options.stack_size_mb.saturating_mul(1024 * 1024))
            .build()
            .map_err(|e| EngineError::PoolUnavailable(e.to_string()))?;

        info!(
            "Worker pool: {} files in {} batches on {} workers",
            files.len(),
            batches.len(),
            workers
        );

        let started = Instant::now();
        let expected: Vec<(usize, WorkerBatch)> = batches
            .iter()
            .map(|b| (b.batch_id, b.clone()))
            .collect();

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerOutcome>();
        let factory = self.factory.clone();
        let parser = self.parser.clone();
        let verbose = self.verbose;

        let dispatcher = tokio::task::spawn_blocking(move || {
            pool.scope(|scope| {
                for batch in batches {
                    let tx = tx.clone();
                    let factory = factory.clone();
                    let parser = parser.clone();
                    let ctx = ctx.clone();

                    scope.spawn(move |_| {
                        let outcome = run_batch(batch, factory, parser, ctx, verbose);
                        if tx.send(outcome).is_err() {
                            debug!("Outcome receiver dropped before batch finished");
                        }
                    });
                }
            });
        });

        let mut outcomes = Vec::with_capacity(expected.len());
        while let Some(outcome) = rx.recv().await {
            if let Some(failure) = &outcome.failure {
                error!("Batch {} failed: {}", outcome.batch_id, failure.message);
            } else {
                debug!(
                    "Batch {} finished: {} files, {} unit errors",
                    outcome.batch_id,
                    outcome.processed_count,
                    outcome.errors.len()
                );
            }
            outcomes.push(outcome);
        }

        if let Err(e) = dispatcher.await {
            error!("Worker dispatcher terminated abnormally: {}", e);
        }

        // A batch whose outcome never arrived counts as a crashed worker
        let received: HashSet<usize> = outcomes.iter().map(|o| o.batch_id).collect();
        for (batch_id, batch) in expected {
            if !received.contains(&batch_id) {
                outcomes.push(WorkerOutcome::failed(&batch, "worker exited without reporting"));
            }
        }

        info!(
            "Worker pool finished {} batches in {}ms",
            outcomes.len(),
            started.elapsed().as_millis()
        );
        Ok(outcomes)
    }
}

/// Worker body; never panics and never returns an error
fn run_batch(
    batch: WorkerBatch,
    factory: RegistryFactory,
    parser: Option<Arc<dyn SourceParser>>,
    ctx: Arc<ExecutionContext>,
    verbose: bool,
) -> WorkerOutcome {
    let result = catch_unwind(AssertUnwindSafe(|| {
        execute_batch(&batch, factory, parser, ctx, verbose)
    }));

    match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => WorkerOutcome::failed(&batch, &e.to_string()),
        Err(payload) => {
            WorkerOutcome::failed(&batch, &format!("panicked: {}", panic_message(payload)))
        }
    }
}

fn execute_batch(
    batch: &WorkerBatch,
    factory: RegistryFactory,
    parser: Option<Arc<dyn SourceParser>>,
    ctx: Arc<ExecutionContext>,
    verbose: bool,
) -> Result<WorkerOutcome> {
    let registry = TechniqueRegistry::from_factory(factory)?;
    let techniques = registry.resolve(&batch.technique_names)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let state = EngineState::new(parser);
    let executor = SequentialExecutor::new(batch.timeout_ms, verbose);

    let file_runs = runtime.block_on(executor.run_files(&batch.files, &techniques, &ctx, &state));
    // Units abandoned on timeout may still hold blocking threads
    runtime.shutdown_background();
    let file_runs = file_runs?;

    let errors = file_runs
        .iter()
        .flat_map(|r| r.occurrences.iter())
        .filter(|o| o.is_analyzer_error())
        .map(|o| o.message.clone())
        .collect();

    Ok(WorkerOutcome {
        batch_id: batch.batch_id,
        processed_count: file_runs.len(),
        paths: batch.files.iter().map(|f| f.path.clone()).collect(),
        file_runs,
        errors,
        failure: None,
    })
}
