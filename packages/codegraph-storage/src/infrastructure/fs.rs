//! Filesystem adapter
//!
//! Atomic replace: the value is written to a sibling temp file, fsync'ed,
//! then renamed over the target. A crash mid-write leaves the previous value
//! in place (plus at most one stray `.tmp` file).

use crate::{Persistence, Result, StorageError};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// JSON-on-disk persistence
#[derive(Debug, Default)]
pub struct FsStore {
    /// Distinguishes temp files of concurrent writers in one process
    tmp_seq: AtomicU64,
}

impl FsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tmp_path(&self, path: &Path) -> Result<PathBuf> {
        let file_name = path
            .file_name()
            .ok_or_else(|| StorageError::invalid_path(path))?
            .to_string_lossy();
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);

        Ok(path.with_file_name(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            seq
        )))
    }
}

impl Persistence for FsStore {
    fn load_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn save_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(StorageError::invalid_path(path));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let tmp_path = self.tmp_path(path)?;
        let written = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(StorageError::io(&tmp_path, e));
        }

        // Atomic rename
        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StorageError::io(path, e));
        }

        debug!("Saved {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}
