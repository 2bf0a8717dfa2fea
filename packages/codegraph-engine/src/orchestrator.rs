//! Engine entry points
//!
//! `Engine::run` is the full pipeline: global techniques, incremental cache
//! lookup, strategy selection, merge, state and history persistence.
//! `Engine::run_with_pool` is the bare parallel path without incremental
//! state or history.

use crate::config::{EngineConfig, RunOptions};
use crate::context::{EngineState, ExecutionContext, SourceParser};
use crate::error::{EngineError, Result};
use crate::executor::{FileRun, GlobalRun, SequentialExecutor};
use crate::fingerprint::Fingerprint;
use crate::incremental::{FileCacheEntry, IncrementalState, IncrementalStore};
use crate::metrics::{HistoryStore, MetricsRecorder, RunSummary, TechniqueTotals};
use crate::model::{ExecutionResult, ExecutionStrategy, FileRecord, Occurrence, UnitCounts};
use crate::pool::{PoolOptions, WorkerPool};
use crate::technique::{Technique, TechniqueRegistry};
use chrono::{DateTime, Utc};
use codegraph_storage::{FsStore, Persistence};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-file results of one dispatch, keyed by path
#[derive(Default)]
struct Dispatch {
    runs: HashMap<String, FileRun>,
    /// Worker failures keyed by the first path of the failed batch
    failures: HashMap<String, Occurrence>,
    strategy: Option<ExecutionStrategy>,
}

impl Dispatch {
    fn sequential(runs: Vec<FileRun>) -> Self {
        Self {
            runs: runs.into_iter().map(|r| (r.path.clone(), r)).collect(),
            strategy: Some(ExecutionStrategy::Sequential),
            ..Default::default()
        }
    }

    fn strategy(&self) -> ExecutionStrategy {
        self.strategy.unwrap_or(ExecutionStrategy::Sequential)
    }
}

/// Cached results resolved before dispatch
struct CacheHit {
    occurrences: Vec<Occurrence>,
    counts: UnitCounts,
}

/// Technique execution engine
pub struct Engine {
    config: EngineConfig,
    persistence: Arc<dyn Persistence>,
    parser: Option<Arc<dyn SourceParser>>,
    #[cfg(feature = "metrics")]
    telemetry: Option<crate::telemetry::EngineTelemetry>,
}

impl Engine {
    /// Engine persisting to the local filesystem
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            persistence: Arc::new(FsStore::new()),
            parser: None,
            #[cfg(feature = "metrics")]
            telemetry: None,
        })
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn SourceParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Export run counters to a Prometheus registry
    #[cfg(feature = "metrics")]
    pub fn with_prometheus(mut self, registry: &prometheus::Registry) -> Result<Self> {
        let telemetry = crate::telemetry::EngineTelemetry::new(registry)
            .map_err(|e| EngineError::runtime(format!("metrics registration failed: {}", e)))?;
        self.telemetry = Some(telemetry);
        Ok(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Forget every cached file result under `base_dir`
    pub fn reset_incremental(&self, base_dir: impl Into<PathBuf>) -> Result<()> {
        let base_dir = base_dir.into();
        IncrementalStore::new(self.persistence.clone(), self.config.state_path(&base_dir)).reset()?;
        Ok(())
    }

    /// Run every technique over `files`
    ///
    /// Errors only for caller mistakes (duplicate paths) and invalid unit
    /// transitions; technique failures become occurrences.
    pub async fn run(
        &self,
        files: Vec<FileRecord>,
        registry: &TechniqueRegistry,
        base_dir: impl Into<PathBuf>,
        integrity_result: serde_json::Value,
        options: RunOptions,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let timestamp = Utc::now();
        check_unique_paths(&files)?;

        let base_dir = base_dir.into();
        info!(
            "Starting run: {} files, {} techniques ({} global)",
            files.len(),
            registry.len(),
            registry.globals().len()
        );

        let ctx = Arc::new(ExecutionContext::new(
            base_dir.clone(),
            files,
            integrity_result,
        ));
        let engine_state = EngineState::new(self.parser.clone());
        let executor = SequentialExecutor::new(self.config.timeout_ms, options.verbose);

        let store = self.config.incremental.enabled.then(|| {
            IncrementalStore::new(self.persistence.clone(), self.config.state_path(&base_dir))
        });
        let mut inc_state = store.as_ref().map(|s| s.load()).unwrap_or_default();

        // Globals first, never cached
        let globals = executor.run_globals(&registry.globals(), &ctx).await?;

        // Resolve cache hits before dispatch
        let per_file = registry.per_file();
        let mut hits: HashMap<String, CacheHit> = HashMap::new();
        let mut pending: Vec<FileRecord> = Vec::new();
        for file in &ctx.files {
            let fingerprint = Fingerprint::of_content(file.content.as_deref());
            let reusable = match (&store, fingerprint) {
                (Some(_), Some(fp)) => inc_state.lookup(&file.path, &fp).is_some(),
                _ => false,
            };

            if reusable {
                let occurrences = inc_state.record_reuse(&file.path).unwrap_or_default();
                let counts = executor.skip_file(file, &per_file)?;
                hits.insert(file.path.clone(), CacheHit { occurrences, counts });
            } else {
                pending.push(file.clone());
            }
        }

        let pool_options = self.pool_options_for(pending.len(), registry);
        let dispatch = self
            .dispatch(&pending, registry, &ctx, &engine_state, &executor, pool_options, options.verbose)
            .await?;

        if let Some(store) = &store {
            update_incremental(&mut inc_state, &pending, &dispatch);
            inc_state.finish_run(pending.len(), started.elapsed().as_millis() as u64);
            store.save(&inc_state);
        }

        let (result, totals) = self.assemble(&ctx, globals, hits, dispatch, timestamp, started, options);

        if self.config.metrics.enabled {
            let history = HistoryStore::new(
                self.persistence.clone(),
                self.config.history_path(&base_dir),
                self.config.metrics.history_cap,
            );
            history.append(summarize(&result, totals, timestamp));
        }

        self.observe(&result);

        info!(
            "Run finished in {}ms: {} occurrences, {} units completed, {} failed, {} timed out, {} skipped ({})",
            result.duration_ms,
            result.occurrences.len(),
            result.units.completed,
            result.units.failed,
            result.units.timed_out,
            result.units.skipped,
            result.strategy
        );
        Ok(result)
    }

    /// Run per-file techniques on the worker pool, without incremental state
    ///
    /// Global techniques still run first, in this process. Falls back to the
    /// sequential executor when the registry has no factory or the pool
    /// cannot start.
    pub async fn run_with_pool(
        &self,
        files: Vec<FileRecord>,
        registry: &TechniqueRegistry,
        context: Arc<ExecutionContext>,
        pool_options: PoolOptions,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let timestamp = Utc::now();
        check_unique_paths(&files)?;

        let engine_state = EngineState::new(self.parser.clone());
        let executor = SequentialExecutor::new(pool_options.timeout_ms, false);

        let globals = executor.run_globals(&registry.globals(), &context).await?;
        let dispatch = self
            .dispatch(&files, registry, &context, &engine_state, &executor, Some(pool_options), false)
            .await?;

        // Ordering follows `files`, which may be a subset of the context
        let ordered = ExecutionContext {
            files,
            ..(*context).clone()
        };
        let (result, _) = self.assemble(
            &ordered,
            globals,
            HashMap::new(),
            dispatch,
            timestamp,
            started,
            RunOptions::default(),
        );
        Ok(result)
    }

    #[cfg(feature = "metrics")]
    fn observe(&self, result: &ExecutionResult) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.observe(result);
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn observe(&self, _result: &ExecutionResult) {}

    /// Pool options when the pool should engage for `pending` files
    fn pool_options_for(&self, pending: usize, registry: &TechniqueRegistry) -> Option<PoolOptions> {
        let pool = &self.config.pool;
        if !pool.enabled || pending == 0 || pending < pool.threshold {
            return None;
        }
        if !registry.supports_workers() {
            info!(
                "{} files pending but registry has no factory, running sequentially",
                pending
            );
            return None;
        }
        Some(self.config.pool_options())
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        pending: &[FileRecord],
        registry: &TechniqueRegistry,
        ctx: &Arc<ExecutionContext>,
        engine_state: &EngineState,
        executor: &SequentialExecutor,
        pool_options: Option<PoolOptions>,
        verbose: bool,
    ) -> Result<Dispatch> {
        let per_file: Vec<Arc<dyn Technique>> = registry.per_file();

        let (Some(options), Some(factory)) = (pool_options, registry.factory()) else {
            let runs = executor.run_files(pending, &per_file, ctx, engine_state).await?;
            return Ok(Dispatch::sequential(runs));
        };

        info!(
            "Strategy: worker pool ({} files, batch size {}, max {} workers)",
            pending.len(),
            options.batch_size,
            options.max_workers
        );
        let pool = WorkerPool::new(options, factory)
            .with_parser(self.parser.clone())
            .with_verbose(verbose);

        let outcomes = match pool.run(pending, &registry.per_file_names(), ctx.clone()).await {
            Ok(outcomes) => outcomes,
            Err(EngineError::PoolUnavailable(reason)) => {
                warn!("Worker pool unavailable ({}), falling back to sequential", reason);
                let runs = executor.run_files(pending, &per_file, ctx, engine_state).await?;
                return Ok(Dispatch::sequential(runs));
            }
            Err(e) => return Err(e),
        };

        let mut dispatch = Dispatch {
            strategy: Some(ExecutionStrategy::WorkerPool),
            ..Default::default()
        };
        for outcome in outcomes {
            if let Some(failure) = outcome.failure {
                // Files of a failed batch have no run and are not cached
                if let Some(first) = outcome.paths.first() {
                    dispatch.failures.insert(first.clone(), failure);
                }
                continue;
            }
            for run in outcome.file_runs {
                dispatch.runs.insert(run.path.clone(), run);
            }
        }
        Ok(dispatch)
    }

    /// Merge everything in input order into the final result and run totals
    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        ctx: &ExecutionContext,
        globals: GlobalRun,
        mut hits: HashMap<String, CacheHit>,
        mut dispatch: Dispatch,
        timestamp: DateTime<Utc>,
        started: Instant,
        options: RunOptions,
    ) -> (ExecutionResult, Vec<TechniqueTotals>) {
        let strategy = dispatch.strategy();
        let mut recorder = MetricsRecorder::new();
        let mut units = globals.counts;
        let mut occurrences = globals.occurrences;
        let mut analyzed_paths = Vec::with_capacity(ctx.files.len());
        let mut reused_files = 0;
        recorder.extend(globals.metrics);

        for file in &ctx.files {
            if let Some(hit) = hits.remove(&file.path) {
                units.merge(&hit.counts);
                occurrences.extend(hit.occurrences);
                analyzed_paths.push(file.path.clone());
                reused_files += 1;
                continue;
            }
            if let Some(failure) = dispatch.failures.remove(&file.path) {
                occurrences.push(failure);
            }
            if let Some(run) = dispatch.runs.remove(&file.path) {
                units.merge(&run.counts);
                recorder.extend(run.metrics);
                occurrences.extend(run.occurrences);
                analyzed_paths.push(file.path.clone());
            }
        }

        let totals = recorder.totals();
        let result = ExecutionResult {
            total_files: ctx.files.len(),
            analyzed_paths,
            reused_files,
            occurrences,
            timestamp_ms: timestamp.timestamp_millis(),
            duration_ms: started.elapsed().as_millis() as u64,
            metrics: (!options.compact).then(|| totals.clone()),
            strategy,
            units,
        };
        (result, totals)
    }
}

fn check_unique_paths(files: &[FileRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(files.len());
    for file in files {
        if !seen.insert(file.path.as_str()) {
            return Err(EngineError::DuplicateFile(file.path.clone()));
        }
    }
    Ok(())
}

/// Write clean runs to the cache; drop entries of files that failed or were lost
fn update_incremental(state: &mut IncrementalState, pending: &[FileRecord], dispatch: &Dispatch) {
    for file in pending {
        match dispatch.runs.get(&file.path) {
            Some(run) if run.is_cacheable() => {
                if let Some(fingerprint) = run.fingerprint {
                    state.record_run(
                        file.path.clone(),
                        FileCacheEntry::from_run(fingerprint, run.occurrences.clone(), &run.metrics),
                    );
                }
            }
            _ => {
                state.invalidate(&file.path);
            }
        }
    }
}

fn summarize(result: &ExecutionResult, totals: Vec<TechniqueTotals>, timestamp: DateTime<Utc>) -> RunSummary {
    RunSummary {
        run_id: Uuid::new_v4(),
        timestamp,
        duration_ms: result.duration_ms,
        strategy: result.strategy,
        total_files: result.total_files,
        executed_files: result.analyzed_paths.len().saturating_sub(result.reused_files),
        reused_files: result.reused_files,
        occurrence_count: result.occurrences.len(),
        units: result.units,
        techniques: totals,
    }
}
