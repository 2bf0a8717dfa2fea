//! codegraph-storage - Persistence port for engine state
//!
//! > "Write the whole value or nothing."
//!
//! ## Core Principles
//!
//! 1. **Atomic replace**: every save is write-temp-then-rename
//! 2. **Absence is normal**: loading a missing value yields `None`
//! 3. **Corruption is distinguishable**: undecodable bytes surface as
//!    `ErrorKind::Corrupted` so callers can start cold instead of failing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codegraph_storage::{load_json, save_json, FsStore};
//!
//! let store = FsStore::new();
//! save_json(&store, path, &state)?;
//! let state: Option<State> = load_json(&store, path)?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{load_json, save_json, Persistence};
pub use infrastructure::{FsStore, MemoryStore};
