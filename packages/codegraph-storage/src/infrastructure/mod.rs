//! Infrastructure layer - Persistence adapters
//!
//! - `fs`: JSON files on local disk, atomic replace via temp file + rename
//! - `memory`: process-local map (tests, dry runs)

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;
