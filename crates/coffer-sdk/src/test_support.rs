//! Fixtures shared by the proxy tests, plus end-to-end cache checks.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use coffer_cache::{CacheRecord, FileKvStore, KvStore};
use coffer_engine::InMemoryEngine;
use coffer_protocol::ErrorKind;
use coffer_types::RepoOptions;
use coffer_worker::mem_loader;

use crate::config::BridgeConfig;
use crate::proxy::{Repo, Root};

pub const URI: &str = "mem://key@repo";

/// A started and initialised root over a fresh in-memory engine.
pub async fn root() -> Root {
    let root = Root::start(BridgeConfig::default(), mem_loader(InMemoryEngine::new())).unwrap();
    root.init_env(None).await.unwrap();
    root
}

/// Open (creating if needed) the repository at [`URI`].
pub async fn open_repo(root: &Root) -> Repo {
    root.open_repo(URI, "pwd", &RepoOptions::new().create(true))
        .await
        .unwrap()
}

async fn start(dir: &Path, engine: &InMemoryEngine) -> Root {
    let config = BridgeConfig {
        cache_dir: Some(dir.to_path_buf()),
        ..BridgeConfig::default()
    };
    let root = Root::start(config, mem_loader(engine.clone())).unwrap();
    root.init_env(Some("info")).await.unwrap();
    root
}

fn data_keys(records: &[CacheRecord]) -> usize {
    records.iter().filter(|r| r.rel_path.starts_with("data/")).count()
}

#[tokio::test]
async fn cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let engine = InMemoryEngine::new();
    let store = FileKvStore::new(dir.path());

    let first = start(dir.path(), &engine).await;
    let repo = open_repo(&first).await;
    repo.create_file("/kept").await.unwrap().write_once("persisted").await.unwrap();
    repo.close().await.unwrap();
    first.exit().await;
    let mut saved = store.load("repo").await.unwrap();
    saved.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    assert!(data_keys(&saved) > 0);

    let second = start(dir.path(), &engine).await;
    let repo = open_repo(&second).await;
    let file = repo.open_file("/kept").await.unwrap();
    file.seek(SeekFrom::Start(0)).await.unwrap();
    assert_eq!(file.read_all_string().await.unwrap(), "persisted");
    repo.close().await.unwrap();
    second.exit().await;
    let mut reloaded = store.load("repo").await.unwrap();
    reloaded.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    assert_eq!(reloaded, saved);
}

#[tokio::test]
async fn exit_discards_unflushed_cache() {
    let dir = tempfile::tempdir().unwrap();
    let engine = InMemoryEngine::new();
    let root = start(dir.path(), &engine).await;
    let repo = open_repo(&root).await;
    repo.create_file("/f").await.unwrap().write_once("gone").await.unwrap();
    root.exit().await;

    let store = FileKvStore::new(dir.path());
    assert!(store.load("repo").await.unwrap().is_empty());
    assert_eq!(engine.repo_count(), 1);
}

#[tokio::test]
async fn failed_open_leaves_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KvStore> = Arc::new(FileKvStore::new(dir.path()));
    store.put("repo", CacheRecord::new("data/seed", vec![1, 2, 3])).await.unwrap();

    let root = start(dir.path(), &InMemoryEngine::new()).await;
    let err = root.open_repo(URI, "pwd", &RepoOptions::new()).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NativeEngine));
    root.exit().await;

    let records = store.load("repo").await.unwrap();
    assert_eq!(records, vec![CacheRecord::new("data/seed", vec![1, 2, 3])]);
}

#[tokio::test]
async fn bridges_are_independent() {
    let a = root().await;
    let b = root().await;
    let repo = open_repo(&a).await;
    assert!(!b.exists(URI).await.unwrap());
    // Same repository id, separate engines.
    let other = open_repo(&b).await;
    repo.close().await.unwrap();
    other.close().await.unwrap();
    a.exit().await;
    b.exit().await;
}
