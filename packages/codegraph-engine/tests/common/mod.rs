//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use codegraph_engine::{
    Engine, EngineConfig, ExecutionContext, FileRecord, MemoryStore, Occurrence, RegistryFactory,
    Severity, Technique, TechniqueInput, TechniqueRegistry,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const BASE_DIR: &str = "/repo";

/// Marker that makes `TodoScanner` fail on a file
pub const POISON: &str = "#!binary";

/// Enable `RUST_LOG`-driven output for a test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn file(path: &str, content: &str) -> FileRecord {
    FileRecord::with_content(Path::new(BASE_DIR), path, content)
}

/// `count` source files, each with one TODO line
pub fn source_files(count: usize) -> Vec<FileRecord> {
    (0..count)
        .map(|i| {
            file(
                &format!("src/module_{:03}.rs", i),
                &format!("fn f{}() {{}}\n// TODO: tidy module {}\n", i, i),
            )
        })
        .collect()
}

/// Call counter shared between a fixture and the test body
#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// One occurrence per line containing `TODO`; fails on poisoned content
pub struct TodoScanner {
    pub calls: Calls,
}

#[async_trait]
impl Technique for TodoScanner {
    fn name(&self) -> &str {
        "todo-scan"
    }

    fn applies_to(&self, path: &str) -> bool {
        path.ends_with(".rs")
    }

    async fn apply(
        &self,
        input: TechniqueInput,
        _ctx: Arc<ExecutionContext>,
    ) -> anyhow::Result<Vec<Occurrence>> {
        self.calls.bump();
        if input.content.contains(POISON) {
            anyhow::bail!("unexpected binary content in {}", input.path);
        }

        Ok(input
            .content
            .lines()
            .enumerate()
            .filter(|(_, line)| line.contains("TODO"))
            .map(|(idx, _)| {
                Occurrence::new("todo", input.path.clone(), idx as u32 + 1, "TODO left in code")
                    .with_severity(Severity::Low)
            })
            .collect())
    }
}

/// Flags files longer than `max_lines`
pub struct LongFile {
    pub max_lines: usize,
}

#[async_trait]
impl Technique for LongFile {
    fn name(&self) -> &str {
        "long-file"
    }

    async fn apply(
        &self,
        input: TechniqueInput,
        _ctx: Arc<ExecutionContext>,
    ) -> anyhow::Result<Vec<Occurrence>> {
        let lines = input.content.lines().count();
        if lines <= self.max_lines {
            return Ok(Vec::new());
        }
        Ok(vec![Occurrence::new(
            "long-file",
            input.path,
            0,
            format!("{} lines (max {})", lines, self.max_lines),
        )])
    }
}

/// Global technique reporting the number of files in the run
pub struct ProjectSize {
    pub calls: Calls,
}

#[async_trait]
impl Technique for ProjectSize {
    fn name(&self) -> &str {
        "project-size"
    }

    fn is_global(&self) -> bool {
        true
    }

    async fn apply(
        &self,
        _input: TechniqueInput,
        ctx: Arc<ExecutionContext>,
    ) -> anyhow::Result<Vec<Occurrence>> {
        self.calls.bump();
        Ok(vec![Occurrence::new(
            "project-size",
            "",
            0,
            format!("{} files", ctx.files.len()),
        )
        .with_severity(Severity::Info)])
    }
}

/// Never resolves
pub struct Hanging;

#[async_trait]
impl Technique for Hanging {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn apply(
        &self,
        _input: TechniqueInput,
        _ctx: Arc<ExecutionContext>,
    ) -> anyhow::Result<Vec<Occurrence>> {
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}

/// Panics on every file whose path contains `needle`
pub struct PanicsOn {
    pub needle: &'static str,
}

#[async_trait]
impl Technique for PanicsOn {
    fn name(&self) -> &str {
        "panics-on"
    }

    async fn apply(
        &self,
        input: TechniqueInput,
        _ctx: Arc<ExecutionContext>,
    ) -> anyhow::Result<Vec<Occurrence>> {
        if input.path.contains(self.needle) {
            panic!("unreachable state in {}", input.path);
        }
        Ok(Vec::new())
    }
}

/// Holds its thread in a synchronous sleep without ever yielding
pub struct Blocking {
    pub millis: u64,
}

#[async_trait]
impl Technique for Blocking {
    fn name(&self) -> &str {
        "blocking"
    }

    async fn apply(
        &self,
        _input: TechniqueInput,
        _ctx: Arc<ExecutionContext>,
    ) -> anyhow::Result<Vec<Occurrence>> {
        std::thread::sleep(std::time::Duration::from_millis(self.millis));
        Ok(Vec::new())
    }
}

/// Its applicability check panics on paths containing `needle`
pub struct PanickyPredicate {
    pub needle: &'static str,
}

#[async_trait]
impl Technique for PanickyPredicate {
    fn name(&self) -> &str {
        "panicky-predicate"
    }

    fn applies_to(&self, path: &str) -> bool {
        if path.contains(self.needle) {
            panic!("predicate blew up on {}", path);
        }
        true
    }

    async fn apply(
        &self,
        input: TechniqueInput,
        _ctx: Arc<ExecutionContext>,
    ) -> anyhow::Result<Vec<Occurrence>> {
        Ok(vec![Occurrence::new("checked", input.path, 1, "checked")])
    }
}

/// Factory for a TODO scanner plus a long-file check and a global technique
pub fn standard_factory(todo_calls: Calls, global_calls: Calls) -> RegistryFactory {
    Arc::new(move || {
        vec![
            Arc::new(ProjectSize {
                calls: global_calls.clone(),
            }) as Arc<dyn Technique>,
            Arc::new(TodoScanner {
                calls: todo_calls.clone(),
            }),
            Arc::new(LongFile { max_lines: 50 }),
        ]
    })
}

pub fn standard_registry(todo_calls: Calls, global_calls: Calls) -> TechniqueRegistry {
    TechniqueRegistry::from_factory(standard_factory(todo_calls, global_calls))
        .expect("fixture registry is valid")
}

/// Config for tests: short timeout, pool off unless asked for
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.timeout_ms = 2_000;
    config.pool.enabled = false;
    config
}

pub fn engine(config: EngineConfig, store: &MemoryStore) -> Engine {
    Engine::new(config)
        .expect("valid config")
        .with_persistence(Arc::new(store.clone()))
}
