//! In-memory adapter

use crate::{Persistence, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Process-local persistence (cheap to clone, clones share storage)
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.values.lock().contains_key(path)
    }
}

impl Persistence for MemoryStore {
    fn load_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.values.lock().get(path).cloned())
    }

    fn save_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.values
            .lock()
            .insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.values.lock().remove(path);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
