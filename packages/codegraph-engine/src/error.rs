use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors
///
/// Only programmer and environment errors live here. Anything a technique
/// does wrong becomes an occurrence, never an `EngineError`.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] codegraph_storage::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid unit transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Duplicate technique name: {0}")]
    DuplicateTechnique(String),

    #[error("Technique name must not be empty (registry position {0})")]
    EmptyTechniqueName(usize),

    #[error("Technique not found in registry: {0}")]
    TechniqueNotFound(String),

    #[error("Duplicate file path: {0}")]
    DuplicateFile(String),

    #[error("Worker pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl EngineError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn runtime<E: std::fmt::Display>(e: E) -> Self {
        Self::Runtime(e.to_string())
    }

    /// Errors caused by how the engine was called (registry, file list, options)
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateTechnique(_)
                | EngineError::EmptyTechniqueName(_)
                | EngineError::DuplicateFile(_)
                | EngineError::TechniqueNotFound(_)
                | EngineError::Config(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e)
    }
}
