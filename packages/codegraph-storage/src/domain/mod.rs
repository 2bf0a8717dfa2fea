//! Domain layer: the persistence port
//!
//! # Core Contract
//!
//! 1. **Whole-value replace**: a `save` replaces the stored value atomically.
//!    Readers observe either the previous value or the new one, never a mix.
//! 2. **Absence is not an error**: `load` of a missing location is `Ok(None)`.
//! 3. **No locking**: callers serialize their own writes; the port only
//!    guarantees atomic replace.
//!
//! # Examples
//!
//! ```rust
//! use codegraph_storage::{load_json, save_json, MemoryStore};
//! use std::path::Path;
//!
//! let store = MemoryStore::new();
//! let path = Path::new("state.json");
//!
//! save_json(&store, path, &vec![1, 2, 3]).unwrap();
//! let loaded: Option<Vec<u32>> = load_json(&store, path).unwrap();
//! assert_eq!(loaded, Some(vec![1, 2, 3]));
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::{Result, StorageError};

/// Persistence port
///
/// Object-safe so the engine can hold `Arc<dyn Persistence>` and swap the
/// filesystem adapter for the in-memory one in tests.
pub trait Persistence: Send + Sync {
    /// Read the raw bytes stored at `path` (`None` if nothing is stored)
    fn load_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Atomically replace the value stored at `path`
    fn save_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    /// Remove the value stored at `path` (no-op if absent)
    fn remove(&self, path: &Path) -> Result<()>;

    /// Adapter name for log lines
    fn name(&self) -> &'static str;
}

/// Load and decode a JSON value
///
/// Bytes that exist but do not decode into `T` are reported as
/// [`ErrorKind::Corrupted`](crate::ErrorKind::Corrupted) so callers can
/// discard them instead of retrying.
pub fn load_json<T: DeserializeOwned>(store: &dyn Persistence, path: &Path) -> Result<Option<T>> {
    let Some(bytes) = store.load_bytes(path)? else {
        return Ok(None);
    };

    serde_json::from_slice(&bytes).map(Some).map_err(|e| {
        StorageError::corrupted(format!(
            "Stored value at {} does not decode: {}",
            path.display(),
            e
        ))
        .with_source(e)
    })
}

/// Encode a value as JSON and atomically replace the stored copy
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn Persistence,
    path: &Path,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.save_bytes(path, &bytes)
}
