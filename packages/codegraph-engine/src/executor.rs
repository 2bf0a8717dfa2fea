//! Sequential executor
//!
//! Runs one `(technique, file)` unit at a time. Each unit runs on the
//! blocking pool, so a panic surfaces as a `JoinError` instead of unwinding
//! through the loop and a technique that never yields cannot stall the timer
//! racing it. A timed-out unit is abandoned: its cancellation token is
//! triggered, which drops the technique future at its next await point. Code
//! that never yields keeps its blocking thread until it returns.

use crate::context::{EngineState, ExecutionContext};
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::model::{display_path, FileRecord, Occurrence, TechniqueMetric, UnitCounts};
use crate::technique::{Technique, TechniqueInput};
use crate::unit::{Unit, UnitState};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

/// Results of all units run against one file
#[derive(Debug, Clone, Default)]
pub struct FileRun {
    pub path: String,
    /// `None` for files without content (never cached)
    pub fingerprint: Option<Fingerprint>,
    pub occurrences: Vec<Occurrence>,
    pub metrics: Vec<TechniqueMetric>,
    pub counts: UnitCounts,
}

impl FileRun {
    /// May this run be written to the incremental store?
    pub fn is_cacheable(&self) -> bool {
        self.fingerprint.is_some() && !self.counts.has_failures()
    }
}

/// Results of the global techniques of a run
#[derive(Debug, Clone, Default)]
pub struct GlobalRun {
    pub occurrences: Vec<Occurrence>,
    pub metrics: Vec<TechniqueMetric>,
    pub counts: UnitCounts,
}

enum UnitOutcome {
    Completed(Vec<Occurrence>),
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct SequentialExecutor {
    timeout_ms: u64,
    verbose: bool,
}

impl SequentialExecutor {
    /// `timeout_ms == 0` disables the per-technique timeout
    pub fn new(timeout_ms: u64, verbose: bool) -> Self {
        Self {
            timeout_ms,
            verbose,
        }
    }

    fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Run every global technique once, in registration order
    pub async fn run_globals(
        &self,
        globals: &[Arc<dyn Technique>],
        ctx: &Arc<ExecutionContext>,
    ) -> Result<GlobalRun> {
        let mut run = GlobalRun::default();

        for technique in globals {
            let name = technique.name().to_string();
            let mut unit = Unit::new(name.clone(), "");
            unit.start()?;

            let input = TechniqueInput::global(ctx.base_dir.clone(), CancellationToken::new());
            let (outcome, elapsed) = self.run_unit(technique, input, ctx).await;
            let found = self.settle(&mut unit, outcome)?;

            progress!(
                self.verbose,
                "Global technique {} {} in {}ms ({} occurrences)",
                name,
                unit.state(),
                elapsed.as_millis(),
                found.len()
            );

            run.metrics.push(TechniqueMetric {
                name,
                duration_ms: elapsed.as_millis() as u64,
                occurrence_count: if unit.state() == UnitState::Completed {
                    found.len()
                } else {
                    0
                },
                is_global: true,
            });
            run.counts.record(unit.state());
            run.occurrences.extend(found);
        }

        Ok(run)
    }

    /// Run every applicable per-file technique against `file`, in order
    pub async fn run_file(
        &self,
        file: &FileRecord,
        techniques: &[Arc<dyn Technique>],
        ctx: &Arc<ExecutionContext>,
        state: &EngineState,
    ) -> Result<FileRun> {
        let mut run = FileRun {
            path: file.path.clone(),
            fingerprint: Fingerprint::of_content(file.content.as_deref()),
            ..Default::default()
        };

        // A panicking predicate is a failed unit of its own
        let applicable: Vec<_> = techniques
            .iter()
            .filter_map(|t| match applies(&**t, &file.path) {
                Ok(true) => Some((t, None)),
                Ok(false) => None,
                Err(panic) => Some((t, Some(panic))),
            })
            .collect();
        if applicable.is_empty() {
            return Ok(run);
        }

        let content: Arc<str> = Arc::from(file.content.as_deref().unwrap_or(""));
        let ast = state.ast_for(file);

        for (technique, predicate_panic) in applicable {
            let name = technique.name().to_string();
            let mut unit = Unit::new(name.clone(), file.path.clone());
            unit.start()?;

            let (outcome, elapsed) = match predicate_panic {
                Some(panic) => (
                    UnitOutcome::Failed(format!("applies_to panicked: {}", panic)),
                    Duration::ZERO,
                ),
                None => {
                    let input = TechniqueInput {
                        content: content.clone(),
                        path: file.path.clone(),
                        full_path: file.full_path.clone(),
                        ast: ast.clone(),
                        cancel: CancellationToken::new(),
                    };
                    self.run_unit(technique, input, ctx).await
                }
            };
            let found = self.settle(&mut unit, outcome)?;

            progress!(
                self.verbose,
                "{} on {} {} in {}ms ({} occurrences)",
                name,
                file.path,
                unit.state(),
                elapsed.as_millis(),
                found.len()
            );

            run.metrics.push(TechniqueMetric {
                name,
                duration_ms: elapsed.as_millis() as u64,
                occurrence_count: if unit.state() == UnitState::Completed {
                    found.len()
                } else {
                    0
                },
                is_global: false,
            });
            run.counts.record(unit.state());
            run.occurrences.extend(found);
        }

        Ok(run)
    }

    /// Run `files` one after another, in input order
    pub async fn run_files(
        &self,
        files: &[FileRecord],
        techniques: &[Arc<dyn Technique>],
        ctx: &Arc<ExecutionContext>,
        state: &EngineState,
    ) -> Result<Vec<FileRun>> {
        let mut runs = Vec::with_capacity(files.len());
        for file in files {
            runs.push(self.run_file(file, techniques, ctx, state).await?);
        }
        Ok(runs)
    }

    /// Mark every applicable unit of a cache-hit file as skipped
    pub fn skip_file(&self, file: &FileRecord, techniques: &[Arc<dyn Technique>]) -> Result<UnitCounts> {
        let mut counts = UnitCounts::default();
        for technique in techniques {
            match applies(&**technique, &file.path) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(panic) => {
                    warn!("applies_to of {} panicked on {}: {}", technique.name(), file.path, panic);
                    continue;
                }
            }
            let mut unit = Unit::new(technique.name(), file.path.clone());
            unit.skip()?;
            counts.record(unit.state());
        }
        progress!(self.verbose, "{} reused from cache ({} units skipped)", file.path, counts.skipped);
        Ok(counts)
    }

    async fn run_unit(
        &self,
        technique: &Arc<dyn Technique>,
        input: TechniqueInput,
        ctx: &Arc<ExecutionContext>,
    ) -> (UnitOutcome, Duration) {
        let cancel = input.cancel.clone();
        let abandoned = cancel.clone();
        let technique = technique.clone();
        let ctx = ctx.clone();
        let runtime = tokio::runtime::Handle::current();
        let started = Instant::now();

        // The caller's thread keeps driving the timer while the unit runs
        let mut handle = tokio::task::spawn_blocking(move || {
            runtime.block_on(async move {
                tokio::select! {
                    found = technique.apply(input, ctx) => Some(found),
                    _ = abandoned.cancelled() => None,
                }
            })
        });

        let joined = match self.timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    // Best-effort abandonment
                    cancel.cancel();
                    return (UnitOutcome::TimedOut, started.elapsed());
                }
            },
            None => handle.await,
        };

        let outcome = match joined {
            Ok(Some(Ok(found))) => UnitOutcome::Completed(found),
            Ok(Some(Err(e))) => UnitOutcome::Failed(format!("{:#}", e)),
            Ok(None) => UnitOutcome::Failed("cancelled".to_string()),
            Err(join_err) if join_err.is_panic() => {
                UnitOutcome::Failed(format!("panicked: {}", panic_message(join_err.into_panic())))
            }
            Err(join_err) => UnitOutcome::Failed(join_err.to_string()),
        };
        (outcome, started.elapsed())
    }

    /// Move the unit to its terminal state and produce its occurrences
    fn settle(&self, unit: &mut Unit, outcome: UnitOutcome) -> Result<Vec<Occurrence>> {
        match outcome {
            UnitOutcome::Completed(found) => {
                unit.complete()?;
                Ok(found
                    .into_iter()
                    .map(|o| o.with_origin(&unit.technique))
                    .collect())
            }
            UnitOutcome::Failed(error) => {
                unit.fail()?;
                warn!(
                    "Technique {} failed on {}: {}",
                    unit.technique,
                    display_path(&unit.path),
                    error
                );
                Ok(vec![Occurrence::analyzer_exception(
                    &unit.technique,
                    &unit.path,
                    &error,
                )])
            }
            UnitOutcome::TimedOut => {
                unit.time_out()?;
                warn!(
                    "Technique {} timed out after {}ms on {}",
                    unit.technique,
                    self.timeout_ms,
                    display_path(&unit.path)
                );
                Ok(vec![Occurrence::analyzer_timeout(
                    &unit.technique,
                    &unit.path,
                    self.timeout_ms,
                )])
            }
        }
    }
}

/// Evaluate a technique's predicate, containing any panic
fn applies(technique: &dyn Technique, path: &str) -> std::result::Result<bool, String> {
    catch_unwind(AssertUnwindSafe(|| technique.applies_to(path))).map_err(panic_message)
}

/// Readable message from a panic payload
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
