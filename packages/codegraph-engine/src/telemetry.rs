//! Prometheus counters for engine runs (feature `metrics`)

use crate::model::{ExecutionResult, ExecutionStrategy};
use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry, Histogram,
    HistogramOpts, IntCounter, Opts, Registry,
};

#[derive(Clone)]
pub struct EngineTelemetry {
    pub runs: IntCounter,
    pub pool_runs: IntCounter,
    pub files_reused: IntCounter,
    pub files_executed: IntCounter,
    pub unit_failures: IntCounter,
    pub unit_timeouts: IntCounter,
    pub worker_failures: IntCounter,
    pub run_duration: Histogram,
}

impl EngineTelemetry {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            runs: register_int_counter_with_registry!(
                Opts::new("engine_runs_total", "Completed engine runs"),
                registry
            )?,
            pool_runs: register_int_counter_with_registry!(
                Opts::new("engine_pool_runs_total", "Runs executed on the worker pool"),
                registry
            )?,
            files_reused: register_int_counter_with_registry!(
                Opts::new("engine_files_reused_total", "Files served from the incremental store"),
                registry
            )?,
            files_executed: register_int_counter_with_registry!(
                Opts::new("engine_files_executed_total", "Files whose techniques were executed"),
                registry
            )?,
            unit_failures: register_int_counter_with_registry!(
                Opts::new("engine_unit_failures_total", "Technique invocations that failed"),
                registry
            )?,
            unit_timeouts: register_int_counter_with_registry!(
                Opts::new("engine_unit_timeouts_total", "Technique invocations that timed out"),
                registry
            )?,
            worker_failures: register_int_counter_with_registry!(
                Opts::new("engine_worker_failures_total", "Worker batches that crashed"),
                registry
            )?,
            run_duration: register_histogram_with_registry!(
                HistogramOpts::new("engine_run_duration_seconds", "Wall-clock run duration")
                    .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
                registry
            )?,
        })
    }

    pub fn observe(&self, result: &ExecutionResult) {
        self.runs.inc();
        if result.strategy == ExecutionStrategy::WorkerPool {
            self.pool_runs.inc();
        }
        self.files_reused.inc_by(result.reused_files as u64);
        self.files_executed.inc_by(
            result
                .analyzed_paths
                .len()
                .saturating_sub(result.reused_files) as u64,
        );
        self.unit_failures.inc_by(result.units.failed as u64);
        self.unit_timeouts.inc_by(result.units.timed_out as u64);
        self.worker_failures
            .inc_by(result.occurrences.iter().filter(|o| o.is_worker_error()).count() as u64);
        self.run_duration.observe(result.duration_ms as f64 / 1000.0);
    }

    pub fn reuse_rate(&self) -> f64 {
        let reused = self.files_reused.get() as f64;
        let total = reused + self.files_executed.get() as f64;
        if total > 0.0 {
            reused / total
        } else {
            0.0
        }
    }
}
