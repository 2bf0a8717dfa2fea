//! Execution context and per-run engine state
//!
//! `ExecutionContext` is what techniques see: immutable, shared by `Arc`
//! in-process and cloned into each worker. `EngineState` is what the engine
//! owns: collaborator handles plus per-run memoization. It replaces any
//! process-wide cache; one instance per run (and per worker), dropped at the
//! end.

use crate::model::FileRecord;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Opaque syntax handle produced by the parser collaborator
pub type AstHandle = Arc<dyn Any + Send + Sync>;

/// Parser collaborator port
///
/// Returning `None` means "no syntax tree available"; techniques must cope.
pub trait SourceParser: Send + Sync {
    fn parse(&self, content: &str, file_kind: &str) -> Option<AstHandle>;
}

/// Environment collaborators' results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    /// Every path in the run (for techniques resolving imports/references)
    pub valid_path_set: HashSet<String>,
    /// Integrity baseline/diff result, never inspected by the engine
    #[serde(default)]
    pub integrity_result: serde_json::Value,
}

/// Read-only state shared by every technique invocation in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub base_dir: PathBuf,
    pub files: Vec<FileRecord>,
    pub environment: Environment,
}

impl ExecutionContext {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        files: Vec<FileRecord>,
        integrity_result: serde_json::Value,
    ) -> Self {
        let valid_path_set = files.iter().map(|f| f.path.clone()).collect();

        Self {
            base_dir: base_dir.into(),
            files,
            environment: Environment {
                valid_path_set,
                integrity_result,
            },
        }
    }

    pub fn is_valid_path(&self, path: &str) -> bool {
        self.environment.valid_path_set.contains(path)
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Engine-owned state for one run
pub struct EngineState {
    parser: Option<Arc<dyn SourceParser>>,
    asts: DashMap<String, Option<AstHandle>>,
}

impl EngineState {
    pub fn new(parser: Option<Arc<dyn SourceParser>>) -> Self {
        Self {
            parser,
            asts: DashMap::new(),
        }
    }

    pub fn parser(&self) -> Option<Arc<dyn SourceParser>> {
        self.parser.clone()
    }

    /// Syntax handle for a file, parsed at most once per run
    pub fn ast_for(&self, file: &FileRecord) -> Option<AstHandle> {
        if let Some(cached) = self.asts.get(&file.path) {
            return cached.clone();
        }

        let ast = match (&self.parser, &file.content) {
            (Some(parser), Some(content)) => {
                let kind = file.file_kind();
                match catch_unwind(AssertUnwindSafe(|| parser.parse(content, kind))) {
                    Ok(ast) => ast,
                    Err(_) => {
                        warn!("Parser panicked on {}, continuing without syntax tree", file.path);
                        None
                    }
                }
            }
            _ => None,
        };

        self.asts.insert(file.path.clone(), ast.clone());
        ast
    }

    /// Number of files whose parse result is memoized
    pub fn parsed_count(&self) -> usize {
        self.asts.len()
    }
}

impl std::fmt::Debug for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineState")
            .field("has_parser", &self.parser.is_some())
            .field("parsed", &self.asts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LineCountParser {
        calls: AtomicUsize,
    }

    impl SourceParser for LineCountParser {
        fn parse(&self, content: &str, file_kind: &str) -> Option<AstHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if file_kind != "rs" {
                return None;
            }
            Some(Arc::new(content.lines().count()))
        }
    }

    struct PanickingParser;

    impl SourceParser for PanickingParser {
        fn parse(&self, _content: &str, _file_kind: &str) -> Option<AstHandle> {
            panic!("grammar table missing")
        }
    }

    #[test]
    fn test_context_valid_paths() {
        let base = Path::new("/repo");
        let ctx = ExecutionContext::new(
            base,
            vec![
                FileRecord::with_content(base, "src/a.rs", "fn a() {}"),
                FileRecord::with_content(base, "src/b.rs", "fn b() {}"),
            ],
            serde_json::json!({"baseline": "none"}),
        );

        assert!(ctx.is_valid_path("src/a.rs"));
        assert!(!ctx.is_valid_path("src/c.rs"));
        assert_eq!(ctx.file("src/b.rs").unwrap().full_path, base.join("src/b.rs"));
        assert_eq!(ctx.environment.integrity_result["baseline"], "none");
    }

    #[test]
    fn test_ast_parsed_once_per_file() {
        let parser = Arc::new(LineCountParser {
            calls: AtomicUsize::new(0),
        });
        let state = EngineState::new(Some(parser.clone()));
        let file = FileRecord::with_content(Path::new("/repo"), "src/a.rs", "a\nb\nc");

        let first = state.ast_for(&file).unwrap();
        let second = state.ast_for(&file).unwrap();

        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*first.downcast_ref::<usize>().unwrap(), 3);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unparseable_kind_is_memoized_as_none() {
        let parser = Arc::new(LineCountParser {
            calls: AtomicUsize::new(0),
        });
        let state = EngineState::new(Some(parser.clone()));
        let file = FileRecord::with_content(Path::new("/repo"), "README.md", "# hi");

        assert!(state.ast_for(&file).is_none());
        assert!(state.ast_for(&file).is_none());
        assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.parsed_count(), 1);
    }

    #[test]
    fn test_no_parser_or_no_content() {
        let state = EngineState::new(None);
        let file = FileRecord::with_content(Path::new("/repo"), "src/a.rs", "fn a() {}");
        assert!(state.ast_for(&file).is_none());

        let parser = Arc::new(LineCountParser {
            calls: AtomicUsize::new(0),
        });
        let state = EngineState::new(Some(parser.clone()));
        let unreadable = FileRecord::new("src/b.rs", "/repo/src/b.rs", None);
        assert!(state.ast_for(&unreadable).is_none());
        assert_eq!(parser.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parser_panic_is_contained() {
        let state = EngineState::new(Some(Arc::new(PanickingParser)));
        let file = FileRecord::with_content(Path::new("/repo"), "src/a.rs", "fn a() {}");
        assert!(state.ast_for(&file).is_none());
    }
}
