//! Storage engine interface for Coffer.
//!
//! The worker drives an engine only through the traits in [`traits`]:
//! [`Engine`] opens repositories, which hand out files and version readers.
//! [`InMemoryEngine`] is a complete reference implementation with versioned
//! files, content-addressed storage and a block cache hook, used by tests and
//! for embedding.

pub mod error;
pub mod file;
pub mod memory;
mod path;
pub mod traits;
mod volume;

pub use error::{EngineError, EngineResult};
pub use file::{MemFile, MemVersionReader};
pub use memory::{InMemoryEngine, MemRepo, DEFAULT_MAX_FILE_LEN, MEM_SCHEME};
pub use traits::{Engine, NativeFile, NativeRepo, NativeVersionReader};
