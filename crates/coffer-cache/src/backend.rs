use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::store::{CacheRecord, KvStore, StoreOp};

/// Synchronous block cache the storage engine reads and writes through.
pub trait BlockCache: Send + Sync {
    fn contains(&self, key: &str) -> bool;
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn insert(&self, key: &str, data: Vec<u8>);
    fn remove(&self, key: &str);
}

#[derive(Default)]
struct Inner {
    /// Store the map was loaded from; `None` while closed.
    store_id: Option<String>,
    /// Bumped on every open so views from an earlier session go inert.
    epoch: u64,
    map: HashMap<String, Vec<u8>>,
}

impl Inner {
    fn take(&mut self) -> (Option<String>, HashMap<String, Vec<u8>>) {
        (self.store_id.take(), std::mem::take(&mut self.map))
    }
}

/// In-memory cache map mirrored into a persistent [`KvStore`].
///
/// While open the map is the source of truth. The store is read once on
/// [`open`](Self::open) and written only by [`close`](Self::close),
/// [`clear`](Self::clear) and [`destroy`](Self::destroy). A backend built with
/// [`ephemeral`](Self::ephemeral) has no store and never persists anything.
pub struct CacheBackend {
    store: Option<Arc<dyn KvStore>>,
    inner: Arc<RwLock<Inner>>,
}

impl CacheBackend {
    /// A backend persisted into `store`.
    pub fn persistent(store: Arc<dyn KvStore>) -> Self {
        Self {
            store: Some(store),
            inner: Arc::default(),
        }
    }

    /// A memory-only backend.
    pub fn ephemeral() -> Self {
        Self {
            store: None,
            inner: Arc::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.read().expect("lock poisoned").store_id.is_some()
    }

    /// Id of the store currently loaded, if open.
    pub fn store_id(&self) -> Option<String> {
        self.inner.read().expect("lock poisoned").store_id.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load every persisted record of `store_id` into memory. Returns the
    /// number of records loaded.
    pub async fn open(&self, store_id: &str) -> CacheResult<usize> {
        if let Some(current) = self.store_id() {
            return Err(CacheError::AlreadyOpen(current));
        }

        let records = match &self.store {
            Some(store) => store.load(store_id).await?,
            None => Vec::new(),
        };
        let loaded = records.len();

        let mut inner = self.inner.write().expect("lock poisoned");
        inner.map = records.into_iter().map(|r| (r.rel_path, r.data)).collect();
        inner.store_id = Some(store_id.to_string());
        inner.epoch += 1;
        info!(store = store_id, loaded, persistent = self.store.is_some(), "cache opened");
        Ok(loaded)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().expect("lock poisoned").map.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.read().expect("lock poisoned").map.get(key).cloned()
    }

    pub fn insert(&self, key: &str, data: Vec<u8>) -> CacheResult<()> {
        let mut inner = self.inner.write().expect("lock poisoned");
        if inner.store_id.is_none() {
            return Err(CacheError::NotOpen);
        }
        inner.map.insert(key.to_string(), data);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.write().expect("lock poisoned").map.remove(key)
    }

    /// Flush the map to the store as one transaction (clear, then put every
    /// entry), then drop it from memory. Memory is cleared and the backend
    /// marked closed even when the flush fails. Closing a closed backend is a
    /// no-op. Returns the number of records flushed.
    pub async fn close(&self) -> CacheResult<usize> {
        let (store_id, map) = self.inner.write().expect("lock poisoned").take();
        let Some(store_id) = store_id else {
            return Ok(0);
        };
        let Some(store) = &self.store else {
            debug!(store = %store_id, dropped = map.len(), "ephemeral cache closed");
            return Ok(0);
        };

        let count = map.len();
        let mut ops = Vec::with_capacity(count + 1);
        ops.push(StoreOp::Clear);
        ops.extend(
            map.into_iter()
                .map(|(rel_path, data)| StoreOp::Put(CacheRecord { rel_path, data })),
        );

        match store.transact(&store_id, ops).await {
            Ok(()) => {
                info!(store = %store_id, flushed = count, "cache closed");
                Ok(count)
            }
            Err(e) => {
                warn!(store = %store_id, error = %e, "cache flush failed; entries discarded");
                Err(e)
            }
        }
    }

    /// Drop the map without persisting it.
    pub fn immediate_close(&self) {
        let (store_id, map) = self.inner.write().expect("lock poisoned").take();
        if let Some(store_id) = store_id {
            debug!(store = %store_id, discarded = map.len(), "cache discarded");
        }
    }

    /// Empty memory and the persisted store. The backend stays open.
    pub async fn clear(&self) -> CacheResult<()> {
        let store_id = {
            let mut inner = self.inner.write().expect("lock poisoned");
            inner.map.clear();
            inner.store_id.clone()
        };
        match (&self.store, store_id) {
            (Some(store), Some(id)) => store.clear(&id).await,
            (_, None) => Err(CacheError::NotOpen),
            (None, Some(_)) => Ok(()),
        }
    }

    /// Remove a whole persisted store. If this backend has it open, memory is
    /// discarded and the backend closed first. Returns `true` if the store
    /// existed.
    pub async fn destroy(&self, store_id: &str) -> CacheResult<bool> {
        if self.store_id().as_deref() == Some(store_id) {
            self.immediate_close();
        }
        match &self.store {
            Some(store) => store.destroy(store_id).await,
            None => Ok(false),
        }
    }

    /// A [`BlockCache`] handle onto this backend's current session.
    pub fn view(&self) -> CacheView {
        let epoch = self.inner.read().expect("lock poisoned").epoch;
        CacheView {
            inner: Arc::clone(&self.inner),
            epoch,
        }
    }
}

impl Drop for CacheBackend {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.read() {
            if let Some(store_id) = &inner.store_id {
                debug!(store = %store_id, discarded = inner.map.len(), "open cache dropped without flush");
            }
        }
    }
}

/// Engine-facing view of a [`CacheBackend`].
///
/// Valid for the session during which it was created. Once the backend is
/// closed (or reopened) every operation becomes a no-op.
#[derive(Clone)]
pub struct CacheView {
    inner: Arc<RwLock<Inner>>,
    epoch: u64,
}

impl CacheView {
    fn live(&self, inner: &Inner) -> bool {
        inner.store_id.is_some() && inner.epoch == self.epoch
    }
}

impl BlockCache for CacheView {
    fn contains(&self, key: &str) -> bool {
        let inner = self.inner.read().expect("lock poisoned");
        self.live(&inner) && inner.map.contains_key(key)
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().expect("lock poisoned");
        if !self.live(&inner) {
            return None;
        }
        inner.map.get(key).cloned()
    }

    fn insert(&self, key: &str, data: Vec<u8>) {
        let mut inner = self.inner.write().expect("lock poisoned");
        if self.live(&inner) {
            inner.map.insert(key.to_string(), data);
        }
    }

    fn remove(&self, key: &str) {
        let mut inner = self.inner.write().expect("lock poisoned");
        if self.live(&inner) {
            inner.map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileKvStore;
    use crate::memory::InMemoryKvStore;

    fn backend() -> (Arc<InMemoryKvStore>, CacheBackend) {
        let kv = Arc::new(InMemoryKvStore::new());
        let backend = CacheBackend::persistent(kv.clone());
        (kv, backend)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn entries_survive_close_and_reopen() {
        let (_kv, cache) = backend();
        assert_eq!(cache.open("repo").await.unwrap(), 0);
        cache.insert("data/aa", vec![1, 2, 3]).unwrap();
        cache.insert("data/bb", vec![4]).unwrap();
        assert_eq!(cache.close().await.unwrap(), 2);
        assert!(!cache.is_open());
        assert!(cache.is_empty());

        assert_eq!(cache.open("repo").await.unwrap(), 2);
        assert_eq!(cache.get("data/aa"), Some(vec![1, 2, 3]));
        assert!(cache.contains("data/bb"));
    }

    #[tokio::test]
    async fn close_replaces_store_contents() {
        let (kv, cache) = backend();
        cache.open("repo").await.unwrap();
        cache.insert("a", vec![1]).unwrap();
        cache.close().await.unwrap();

        cache.open("repo").await.unwrap();
        cache.remove("a");
        cache.insert("b", vec![2]).unwrap();
        cache.close().await.unwrap();

        let snap = kv.snapshot("repo").unwrap();
        assert_eq!(snap.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(dir.path()));
        let cache = CacheBackend::persistent(kv.clone());
        cache.open("r1").await.unwrap();
        cache.insert("k", vec![9; 32]).unwrap();
        cache.close().await.unwrap();

        let fresh = CacheBackend::persistent(kv);
        fresh.open("r1").await.unwrap();
        assert_eq!(fresh.get("k"), Some(vec![9; 32]));
    }

    #[tokio::test]
    async fn stores_are_scoped_per_id() {
        let (_kv, cache) = backend();
        cache.open("one").await.unwrap();
        cache.insert("k", vec![1]).unwrap();
        cache.close().await.unwrap();

        cache.open("two").await.unwrap();
        assert!(!cache.contains("k"));
    }

    // -----------------------------------------------------------------------
    // Failure paths
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn failed_flush_still_clears_memory() {
        let (kv, cache) = backend();
        cache.open("repo").await.unwrap();
        cache.insert("a", vec![1]).unwrap();
        kv.set_available(false);

        assert!(matches!(cache.close().await, Err(CacheError::Unavailable(_))));
        assert!(!cache.is_open());
        assert!(cache.is_empty());

        kv.set_available(true);
        assert!(kv.snapshot("repo").is_none());
    }

    #[tokio::test]
    async fn immediate_close_leaves_store_untouched() {
        let (kv, cache) = backend();
        cache.open("repo").await.unwrap();
        cache.insert("a", vec![1]).unwrap();
        cache.close().await.unwrap();

        cache.open("repo").await.unwrap();
        cache.insert("b", vec![2]).unwrap();
        cache.immediate_close();

        assert!(!cache.is_open());
        let snap = kv.snapshot("repo").unwrap();
        assert_eq!(snap.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn open_twice_rejected() {
        let (_kv, cache) = backend();
        cache.open("repo").await.unwrap();
        assert!(matches!(cache.open("repo").await, Err(CacheError::AlreadyOpen(_))));
    }

    #[tokio::test]
    async fn insert_requires_open() {
        let (_kv, cache) = backend();
        assert!(matches!(cache.insert("a", vec![]), Err(CacheError::NotOpen)));
        // Closing a closed backend is fine.
        assert_eq!(cache.close().await.unwrap(), 0);
    }

    // -----------------------------------------------------------------------
    // Clear / destroy
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn clear_empties_memory_and_store() {
        let (kv, cache) = backend();
        cache.open("repo").await.unwrap();
        cache.insert("a", vec![1]).unwrap();
        cache.close().await.unwrap();

        cache.open("repo").await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.is_empty());
        assert!(cache.is_open());
        assert!(kv.snapshot("repo").unwrap().is_empty());
    }

    #[tokio::test]
    async fn destroy_closes_and_removes() {
        let (kv, cache) = backend();
        cache.open("repo").await.unwrap();
        cache.insert("a", vec![1]).unwrap();
        cache.close().await.unwrap();
        cache.open("repo").await.unwrap();

        assert!(cache.destroy("repo").await.unwrap());
        assert!(!cache.is_open());
        assert!(kv.snapshot("repo").is_none());
    }

    #[tokio::test]
    async fn ephemeral_never_persists() {
        let cache = CacheBackend::ephemeral();
        cache.open("repo").await.unwrap();
        cache.insert("a", vec![1]).unwrap();
        assert_eq!(cache.close().await.unwrap(), 0);
        cache.open("repo").await.unwrap();
        assert!(cache.is_empty());
        assert!(!cache.destroy("repo").await.unwrap());
    }

    // -----------------------------------------------------------------------
    // View
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn view_goes_inert_after_close() {
        let (_kv, cache) = backend();
        cache.open("repo").await.unwrap();
        let view = cache.view();
        view.insert("a", vec![1]);
        assert_eq!(cache.get("a"), Some(vec![1]));

        cache.close().await.unwrap();
        view.insert("b", vec![2]);
        assert!(view.get("a").is_none());

        cache.open("repo").await.unwrap();
        // A view from the previous session stays inert.
        assert!(!view.contains("a"));
        view.insert("c", vec![3]);
        assert!(!cache.contains("c"));
        assert!(cache.view().contains("a"));
    }
}
