//! Error types for codegraph-storage

use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Serialization/deserialization errors
    Serialization,
    /// I/O errors (read, write, rename)
    IO,
    /// Stored value exists but cannot be trusted (truncated, wrong shape)
    Corrupted,
    /// Invalid storage location (empty path, path without file name)
    InvalidPath,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Serialization => "serialization",
            ErrorKind::IO => "io",
            ErrorKind::Corrupted => "corrupted",
            ErrorKind::InvalidPath => "invalid_path",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::new(
            ErrorKind::IO,
            format!("I/O error on {}: {}", path.display(), source),
        )
        .with_source(source)
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corrupted, message)
    }

    pub fn invalid_path(path: &Path) -> Self {
        Self::new(
            ErrorKind::InvalidPath,
            format!("Invalid storage path: '{}'", path.display()),
        )
    }

    /// Whether the stored value should be discarded rather than retried
    pub fn is_corruption(&self) -> bool {
        matches!(self.kind, ErrorKind::Corrupted | ErrorKind::Serialization)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(ErrorKind::IO, format!("I/O error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
