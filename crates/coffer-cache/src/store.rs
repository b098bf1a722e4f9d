use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CacheResult;

/// One persisted cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Key of the entry, relative to the repository.
    pub rel_path: String,
    pub data: Vec<u8>,
}

impl CacheRecord {
    pub fn new(rel_path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            rel_path: rel_path.into(),
            data,
        }
    }
}

/// One step of a store transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Put(CacheRecord),
    Delete(String),
    Clear,
}

/// Persistent key-value storage holding one named store per repository.
///
/// Implementations must satisfy these invariants:
/// - `transact` is atomic: either every op is applied, in order, or none is.
/// - `load` of a store that was never written returns no records.
/// - Store names are opaque to callers; backends may restrict their charset.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read every record of `store`.
    async fn load(&self, store: &str) -> CacheResult<Vec<CacheRecord>>;

    /// Apply `ops` to `store` in a single transaction.
    async fn transact(&self, store: &str, ops: Vec<StoreOp>) -> CacheResult<()>;

    /// Remove a whole store. Returns `true` if it existed.
    async fn destroy(&self, store: &str) -> CacheResult<bool>;

    async fn put(&self, store: &str, record: CacheRecord) -> CacheResult<()> {
        self.transact(store, vec![StoreOp::Put(record)]).await
    }

    async fn delete(&self, store: &str, rel_path: &str) -> CacheResult<()> {
        self.transact(store, vec![StoreOp::Delete(rel_path.to_string())])
            .await
    }

    async fn clear(&self, store: &str) -> CacheResult<()> {
        self.transact(store, vec![StoreOp::Clear]).await
    }
}
