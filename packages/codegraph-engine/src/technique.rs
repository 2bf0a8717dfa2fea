//! Technique contract and registry

use crate::context::{AstHandle, ExecutionContext};
use crate::error::{EngineError, Result};
use crate::model::Occurrence;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Input handed to one technique invocation
///
/// Owned so the invocation can run on its own task. For global techniques
/// `path` and `content` are empty and `full_path` is the base directory.
#[derive(Clone)]
pub struct TechniqueInput {
    pub content: Arc<str>,
    pub path: String,
    pub full_path: PathBuf,
    pub ast: Option<AstHandle>,
    /// Cancelled when the invocation exceeds its time budget
    pub cancel: CancellationToken,
}

impl TechniqueInput {
    pub fn global(base_dir: PathBuf, cancel: CancellationToken) -> Self {
        Self {
            content: Arc::from(""),
            path: String::new(),
            full_path: base_dir,
            ast: None,
            cancel,
        }
    }

    pub fn is_global(&self) -> bool {
        self.path.is_empty()
    }
}

/// Technique trait (pluggable analyzers)
///
/// Implementations must tolerate being invoked again for the same file (a
/// cache miss re-runs them) and must not assume an `ast` is present.
#[async_trait]
pub trait Technique: Send + Sync {
    /// Unique registry key
    fn name(&self) -> &str;

    /// Should this technique run on `path`?
    fn applies_to(&self, _path: &str) -> bool {
        true
    }

    /// Global techniques run once per run, never cached, never distributed
    fn is_global(&self) -> bool {
        false
    }

    /// Analyze one file (or the whole project for global techniques)
    async fn apply(
        &self,
        input: TechniqueInput,
        ctx: Arc<ExecutionContext>,
    ) -> anyhow::Result<Vec<Occurrence>>;
}

/// Builds a fresh, identically ordered technique list
///
/// Workers call this to get their own registry instead of receiving
/// technique objects from the orchestrator.
pub type RegistryFactory = Arc<dyn Fn() -> Vec<Arc<dyn Technique>> + Send + Sync>;

/// Ordered technique registry with name lookup
pub struct TechniqueRegistry {
    techniques: Vec<Arc<dyn Technique>>,
    index: HashMap<String, usize>,
    factory: Option<RegistryFactory>,
}

impl TechniqueRegistry {
    /// Registry from an explicit list (cannot be rebuilt inside workers)
    pub fn new(techniques: Vec<Arc<dyn Technique>>) -> Result<Self> {
        let index = Self::build_index(&techniques)?;
        Ok(Self {
            techniques,
            index,
            factory: None,
        })
    }

    /// Registry that workers can reconstruct by calling `factory`
    pub fn from_factory(factory: RegistryFactory) -> Result<Self> {
        let techniques = factory();
        let index = Self::build_index(&techniques)?;
        Ok(Self {
            techniques,
            index,
            factory: Some(factory),
        })
    }

    fn build_index(techniques: &[Arc<dyn Technique>]) -> Result<HashMap<String, usize>> {
        let mut index = HashMap::with_capacity(techniques.len());
        for (pos, technique) in techniques.iter().enumerate() {
            let name = technique.name();
            if name.trim().is_empty() {
                return Err(EngineError::EmptyTechniqueName(pos));
            }
            if index.insert(name.to_string(), pos).is_some() {
                return Err(EngineError::DuplicateTechnique(name.to_string()));
            }
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.techniques.len()
    }

    pub fn is_empty(&self) -> bool {
        self.techniques.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Technique>> {
        self.index.get(name).map(|&pos| &self.techniques[pos])
    }

    /// Resolve names to techniques, keeping the order of `names`
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn Technique>>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| EngineError::TechniqueNotFound(name.clone()))
            })
            .collect()
    }

    /// Global techniques in registration order
    pub fn globals(&self) -> Vec<Arc<dyn Technique>> {
        self.techniques
            .iter()
            .filter(|t| t.is_global())
            .cloned()
            .collect()
    }

    /// Per-file techniques in registration order
    pub fn per_file(&self) -> Vec<Arc<dyn Technique>> {
        self.techniques
            .iter()
            .filter(|t| !t.is_global())
            .cloned()
            .collect()
    }

    pub fn per_file_names(&self) -> Vec<String> {
        self.techniques
            .iter()
            .filter(|t| !t.is_global())
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.techniques.iter().map(|t| t.name()).collect()
    }

    /// Can workers rebuild this registry?
    pub fn supports_workers(&self) -> bool {
        self.factory.is_some()
    }

    pub fn factory(&self) -> Option<RegistryFactory> {
        self.factory.clone()
    }

    /// Fresh registry built from the factory (`None` without a factory)
    pub fn rebuild(&self) -> Option<Result<TechniqueRegistry>> {
        self.factory
            .as_ref()
            .map(|factory| Self::from_factory(factory.clone()))
    }
}

impl std::fmt::Debug for TechniqueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TechniqueRegistry")
            .field("techniques", &self.names())
            .field("supports_workers", &self.supports_workers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Mock technique for testing
    struct MockTechnique {
        name: &'static str,
        global: bool,
    }

    #[async_trait]
    impl Technique for MockTechnique {
        fn name(&self) -> &str {
            self.name
        }

        fn applies_to(&self, path: &str) -> bool {
            path.ends_with(".rs")
        }

        fn is_global(&self) -> bool {
            self.global
        }

        async fn apply(
            &self,
            input: TechniqueInput,
            _ctx: Arc<ExecutionContext>,
        ) -> anyhow::Result<Vec<Occurrence>> {
            Ok(vec![Occurrence::new("mock", input.path, 1, "found")])
        }
    }

    fn mock(name: &'static str, global: bool) -> Arc<dyn Technique> {
        Arc::new(MockTechnique { name, global })
    }

    #[test]
    fn test_registry_partitions_in_order() {
        let registry = TechniqueRegistry::new(vec![
            mock("a", false),
            mock("g1", true),
            mock("b", false),
            mock("g2", true),
        ])
        .unwrap();

        let globals: Vec<_> = registry.globals().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(globals, vec!["g1", "g2"]);
        assert_eq!(registry.per_file_names(), vec!["a", "b"]);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = TechniqueRegistry::new(vec![mock("a", false), mock("a", true)]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTechnique(name) if name == "a"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = TechniqueRegistry::new(vec![mock("a", false), mock(" ", false)]).unwrap_err();
        assert!(matches!(err, EngineError::EmptyTechniqueName(1)));
    }

    #[test]
    fn test_resolve_preserves_requested_order() {
        let registry =
            TechniqueRegistry::new(vec![mock("a", false), mock("b", false), mock("c", false)])
                .unwrap();

        let resolved = registry
            .resolve(&["c".to_string(), "a".to_string()])
            .unwrap();
        let names: Vec<_> = resolved.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["c", "a"]);

        let err = registry.resolve(&["missing".to_string()]).err().unwrap();
        assert!(matches!(err, EngineError::TechniqueNotFound(_)));
    }

    #[test]
    fn test_factory_registry_rebuilds() {
        let factory: RegistryFactory = Arc::new(|| vec![mock("a", false), mock("g", true)]);
        let registry = TechniqueRegistry::from_factory(factory).unwrap();
        assert!(registry.supports_workers());

        let rebuilt = registry.rebuild().unwrap().unwrap();
        assert_eq!(rebuilt.names(), registry.names());
        // Fresh instances, not shared ones
        assert!(!Arc::ptr_eq(
            registry.get("a").unwrap(),
            rebuilt.get("a").unwrap()
        ));
    }

    #[test]
    fn test_plain_registry_cannot_rebuild() {
        let registry = TechniqueRegistry::new(vec![mock("a", false)]).unwrap();
        assert!(!registry.supports_workers());
        assert!(registry.rebuild().is_none());
    }

    #[tokio::test]
    async fn test_mock_technique_apply() {
        let technique = mock("a", false);
        let ctx = Arc::new(ExecutionContext::new("/repo", vec![], serde_json::Value::Null));
        let input = TechniqueInput {
            content: Arc::from("fn main() {}"),
            path: "src/main.rs".to_string(),
            full_path: PathBuf::from("/repo/src/main.rs"),
            ast: None,
            cancel: CancellationToken::new(),
        };

        assert!(technique.applies_to(&input.path));
        assert!(!input.is_global());

        let found = technique.apply(input, ctx).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "src/main.rs");
    }
}
