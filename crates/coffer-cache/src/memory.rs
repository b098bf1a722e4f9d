use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::store::{CacheRecord, KvStore, StoreOp};

/// In-memory, HashMap-based key-value store.
///
/// Intended for tests and embedding. Stores live as long as the value does.
/// Availability can be toggled to simulate a store that cannot be reached.
pub struct InMemoryKvStore {
    stores: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    available: AtomicBool,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent operation succeed (`true`) or fail with
    /// [`CacheError::Unavailable`] (`false`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Copy of one store's contents, or `None` if it does not exist.
    pub fn snapshot(&self, store: &str) -> Option<BTreeMap<String, Vec<u8>>> {
        self.stores.read().expect("lock poisoned").get(store).cloned()
    }

    /// Sorted names of all existing stores.
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stores
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable("in-memory store disabled".into()))
        }
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn load(&self, store: &str) -> CacheResult<Vec<CacheRecord>> {
        self.check_available()?;
        let stores = self.stores.read().expect("lock poisoned");
        Ok(stores
            .get(store)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, v)| CacheRecord::new(k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn transact(&self, store: &str, ops: Vec<StoreOp>) -> CacheResult<()> {
        self.check_available()?;
        let mut stores = self.stores.write().expect("lock poisoned");
        let entries = stores.entry(store.to_string()).or_default();
        let count = ops.len();
        for op in ops {
            match op {
                StoreOp::Put(record) => {
                    entries.insert(record.rel_path, record.data);
                }
                StoreOp::Delete(rel_path) => {
                    entries.remove(&rel_path);
                }
                StoreOp::Clear => entries.clear(),
            }
        }
        debug!(store, ops = count, "in-memory store transaction");
        Ok(())
    }

    async fn destroy(&self, store: &str) -> CacheResult<bool> {
        self.check_available()?;
        Ok(self
            .stores
            .write()
            .expect("lock poisoned")
            .remove(store)
            .is_some())
    }
}
