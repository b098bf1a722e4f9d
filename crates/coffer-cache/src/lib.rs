//! Per-repository cache backend for Coffer.
//!
//! A [`CacheBackend`] holds a repository's block cache in memory while the
//! repository is open and mirrors it into a persistent [`KvStore`] across
//! open/close cycles. The storage engine sees the cache only through the
//! synchronous [`BlockCache`] trait.
//!
//! Two stores ship with the crate: [`InMemoryKvStore`] for tests and
//! embedding, and [`FileKvStore`], which keeps one CRC-framed file per store.

pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use backend::{BlockCache, CacheBackend, CacheView};
pub use error::{CacheError, CacheResult};
pub use file::FileKvStore;
pub use memory::InMemoryKvStore;
pub use store::{CacheRecord, KvStore, StoreOp};
