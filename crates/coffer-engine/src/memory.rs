use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use coffer_cache::BlockCache;
use coffer_types::{DirEntry, FileOptions, Metadata, RepoInfo, RepoOptions, RepoUri, Version};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::file::MemFile;
use crate::path;
use crate::traits::{Engine, NativeFile, NativeRepo};
use crate::volume::Volume;

/// URI scheme served by [`InMemoryEngine`].
pub const MEM_SCHEME: &str = "mem";

/// Largest file, and furthest cursor position, an engine accepts unless
/// configured otherwise: 4 GiB.
pub const DEFAULT_MAX_FILE_LEN: u64 = 1 << 32;

type Registry = Arc<Mutex<HashMap<String, Arc<Mutex<Volume>>>>>;

/// In-memory, versioned reference engine.
///
/// Intended for tests and embedding. Repositories live in a registry shared
/// by every clone of the engine and survive close/reopen for as long as any
/// clone is alive.
#[derive(Clone)]
pub struct InMemoryEngine {
    volumes: Registry,
    max_file_len: u64,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self {
            volumes: Registry::default(),
            max_file_len: DEFAULT_MAX_FILE_LEN,
        }
    }
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap file lengths and cursor positions at `len` bytes for
    /// repositories opened from now on.
    pub fn with_max_file_len(mut self, len: u64) -> Self {
        self.max_file_len = len;
        self
    }

    pub fn max_file_len(&self) -> u64 {
        self.max_file_len
    }

    /// Number of repositories held.
    pub fn repo_count(&self) -> usize {
        self.volumes.lock().expect("lock poisoned").len()
    }

    fn check_scheme(uri: &RepoUri) -> EngineResult<()> {
        if uri.scheme() == MEM_SCHEME {
            Ok(())
        } else {
            Err(EngineError::UnsupportedStorage(uri.scheme().to_string()))
        }
    }

    fn volume(&self, uri: &RepoUri) -> EngineResult<Arc<Mutex<Volume>>> {
        Self::check_scheme(uri)?;
        self.volumes
            .lock()
            .expect("lock poisoned")
            .get(uri.repo_id())
            .cloned()
            .ok_or_else(|| EngineError::RepoNotFound(uri.repo_id().to_string()))
    }
}

impl Engine for InMemoryEngine {
    fn version(&self) -> String {
        format!("coffer-mem {}", env!("CARGO_PKG_VERSION"))
    }

    fn exists(&self, uri: &RepoUri) -> EngineResult<bool> {
        Self::check_scheme(uri)?;
        Ok(self
            .volumes
            .lock()
            .expect("lock poisoned")
            .contains_key(uri.repo_id()))
    }

    fn open_repo(
        &self,
        uri: &RepoUri,
        pwd: &str,
        opts: &RepoOptions,
        cache: Arc<dyn BlockCache>,
    ) -> EngineResult<Box<dyn NativeRepo>> {
        Self::check_scheme(uri)?;
        if pwd.is_empty() {
            return Err(EngineError::InvalidArgument("empty password".into()));
        }

        let volume = {
            let mut volumes = self.volumes.lock().expect("lock poisoned");
            match volumes.get(uri.repo_id()) {
                Some(_) if opts.create_new == Some(true) => {
                    return Err(EngineError::RepoExists(uri.repo_id().to_string()))
                }
                Some(existing) => Arc::clone(existing),
                None if opts.create == Some(true) || opts.create_new == Some(true) => {
                    let created = Arc::new(Mutex::new(Volume::new(uri.as_str(), pwd, opts)));
                    volumes.insert(uri.repo_id().to_string(), Arc::clone(&created));
                    info!(repo = uri.repo_id(), "repository created");
                    created
                }
                None => return Err(EngineError::RepoNotFound(uri.repo_id().to_string())),
            }
        };

        {
            let mut vol = volume.lock().expect("lock poisoned");
            vol.verify_password(pwd)?;
            if vol.opened {
                return Err(EngineError::RepoOpened(uri.repo_id().to_string()));
            }
            vol.opened = true;
        }

        let read_only = opts.read_only.unwrap_or(false);
        info!(repo = uri.repo_id(), read_only, "repository opened");
        Ok(Box::new(MemRepo {
            session: Arc::new(Session {
                volume,
                cache,
                read_only,
                max_file_len: self.max_file_len,
                open: AtomicBool::new(true),
            }),
        }))
    }

    fn repair_super_block(&self, uri: &RepoUri, pwd: &str) -> EngineResult<()> {
        let volume = self.volume(uri)?;
        let vol = volume.lock().expect("lock poisoned");
        vol.verify_password(pwd)?;
        if vol.opened {
            return Err(EngineError::RepoOpened(uri.repo_id().to_string()));
        }
        info!(repo = uri.repo_id(), "super block repaired");
        Ok(())
    }

    fn destroy(&self, uri: &RepoUri) -> EngineResult<()> {
        Self::check_scheme(uri)?;
        let mut volumes = self.volumes.lock().expect("lock poisoned");
        if let Some(volume) = volumes.get(uri.repo_id()) {
            if volume.lock().expect("lock poisoned").opened {
                return Err(EngineError::RepoOpened(uri.repo_id().to_string()));
            }
            volumes.remove(uri.repo_id());
            info!(repo = uri.repo_id(), "repository destroyed");
        }
        Ok(())
    }
}

/// State shared by a repository handle and every file and version reader
/// opened through it.
pub(crate) struct Session {
    volume: Arc<Mutex<Volume>>,
    cache: Arc<dyn BlockCache>,
    read_only: bool,
    max_file_len: u64,
    open: AtomicBool,
}

impl Session {
    /// Lock the volume, failing once the repository is closed.
    pub fn lock(&self) -> EngineResult<MutexGuard<'_, Volume>> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        Ok(self.volume.lock().expect("lock poisoned"))
    }

    /// Like [`lock`](Self::lock) but also rejects read-only repositories.
    pub fn lock_mut(&self) -> EngineResult<MutexGuard<'_, Volume>> {
        if self.read_only {
            return Err(EngineError::ReadOnly);
        }
        self.lock()
    }

    pub fn cache(&self) -> &dyn BlockCache {
        self.cache.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn max_file_len(&self) -> u64 {
        self.max_file_len
    }
}

/// An open repository of the in-memory engine.
pub struct MemRepo {
    session: Arc<Session>,
}

impl MemRepo {
    fn open_node(&mut self, path: &str, opts: &FileOptions) -> EngineResult<Box<dyn NativeFile>> {
        let path = path::normalize(path)?;
        let wants_write = opts.wants_write();
        let readable = opts.read.unwrap_or(true);
        if !readable && !wants_write {
            return Err(EngineError::InvalidArgument(
                "file must be opened for reading or writing".into(),
            ));
        }
        let mut vol = if wants_write {
            self.session.lock_mut()?
        } else {
            self.session.lock()?
        };
        let cache = self.session.cache();

        let id = if vol.exists(&path) {
            if opts.create_new == Some(true) {
                return Err(EngineError::AlreadyExists(path));
            }
            vol.file_id(&path)?
        } else if opts.create == Some(true) || opts.create_new == Some(true) {
            vol.create_file(&path, opts.version_limit, Vec::new(), cache)?
        } else {
            return Err(EngineError::NotFound(path));
        };

        if opts.truncate == Some(true) && vol.current_version(id)?.len > 0 {
            vol.commit(id, Vec::new(), cache)?;
        }
        let append = opts.append == Some(true);
        let pos = if append { vol.current_version(id)?.len } else { 0 };
        drop(vol);

        debug!(%path, readable, writable = wants_write, "file opened");
        Ok(Box::new(MemFile::new(
            Arc::clone(&self.session),
            id,
            path,
            readable,
            wants_write,
            append,
            pos,
        )))
    }
}

impl NativeRepo for MemRepo {
    fn info(&self) -> EngineResult<RepoInfo> {
        let vol = self.session.lock()?;
        Ok(RepoInfo {
            volume_id: vol.id.clone(),
            version: format!("coffer-mem {}", env!("CARGO_PKG_VERSION")),
            uri: vol.uri.clone(),
            compress: vol.compress,
            version_limit: vol.version_limit,
            dedup_chunk: vol.dedup_chunk,
            is_read_only: self.session.is_read_only(),
            created_at: vol.created_at,
        })
    }

    fn reset_password(&mut self, old_pwd: &str, new_pwd: &str) -> EngineResult<()> {
        let mut vol = self.session.lock_mut()?;
        vol.verify_password(old_pwd)?;
        if new_pwd.is_empty() {
            return Err(EngineError::InvalidArgument("empty password".into()));
        }
        vol.set_password(new_pwd);
        info!(volume = %vol.id, "password reset");
        Ok(())
    }

    fn path_exists(&self, path: &str) -> EngineResult<bool> {
        let path = path::normalize(path)?;
        Ok(self.session.lock()?.exists(&path))
    }

    fn is_file(&self, path: &str) -> EngineResult<bool> {
        let path = path::normalize(path)?;
        Ok(self.session.lock()?.is_file(&path))
    }

    fn is_dir(&self, path: &str) -> EngineResult<bool> {
        let path = path::normalize(path)?;
        Ok(self.session.lock()?.is_dir(&path))
    }

    fn create_file(&mut self, path: &str) -> EngineResult<Box<dyn NativeFile>> {
        let opts = FileOptions::new().write(true).create(true).truncate(true);
        self.open_node(path, &opts)
    }

    fn open_file(&mut self, path: &str, opts: &FileOptions) -> EngineResult<Box<dyn NativeFile>> {
        self.open_node(path, opts)
    }

    fn create_dir(&mut self, path: &str) -> EngineResult<()> {
        let path = path::normalize(path)?;
        self.session.lock_mut()?.create_dir(&path)
    }

    fn create_dir_all(&mut self, path: &str) -> EngineResult<()> {
        let path = path::normalize(path)?;
        self.session.lock_mut()?.create_dir_all(&path)
    }

    fn read_dir(&self, path: &str) -> EngineResult<Vec<DirEntry>> {
        let path = path::normalize(path)?;
        self.session.lock()?.read_dir(&path)
    }

    fn metadata(&self, path: &str) -> EngineResult<Metadata> {
        let path = path::normalize(path)?;
        let vol = self.session.lock()?;
        let id = vol.lookup(&path)?;
        vol.metadata_of(id)
    }

    fn history(&self, path: &str) -> EngineResult<Vec<Version>> {
        let path = path::normalize(path)?;
        let vol = self.session.lock()?;
        let id = vol.file_id(&path)?;
        vol.history_of(id)
    }

    fn copy(&mut self, from: &str, to: &str) -> EngineResult<()> {
        let (from, to) = (path::normalize(from)?, path::normalize(to)?);
        self.session
            .lock_mut()?
            .copy(&from, &to, self.session.cache())
    }

    fn copy_dir_all(&mut self, from: &str, to: &str) -> EngineResult<()> {
        let (from, to) = (path::normalize(from)?, path::normalize(to)?);
        self.session
            .lock_mut()?
            .copy_dir_all(&from, &to, self.session.cache())
    }

    fn remove_file(&mut self, path: &str) -> EngineResult<()> {
        let path = path::normalize(path)?;
        self.session
            .lock_mut()?
            .remove_file(&path, self.session.cache())
    }

    fn remove_dir(&mut self, path: &str) -> EngineResult<()> {
        let path = path::normalize(path)?;
        self.session.lock_mut()?.remove_dir(&path)
    }

    fn remove_dir_all(&mut self, path: &str) -> EngineResult<()> {
        let path = path::normalize(path)?;
        self.session
            .lock_mut()?
            .remove_dir_all(&path, self.session.cache())
    }

    fn rename(&mut self, from: &str, to: &str) -> EngineResult<()> {
        let (from, to) = (path::normalize(from)?, path::normalize(to)?);
        self.session.lock_mut()?.rename(&from, &to)
    }

    fn close(&mut self) -> EngineResult<()> {
        if self.session.open.swap(false, Ordering::SeqCst) {
            let mut vol = self.session.volume.lock().expect("lock poisoned");
            vol.opened = false;
            info!(volume = %vol.id, "repository closed");
        }
        Ok(())
    }
}

impl Drop for MemRepo {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::io::SeekFrom;

    use super::*;
    use coffer_cache::CacheBackend;

    fn uri(repo: &str) -> RepoUri {
        RepoUri::parse(&format!("mem://key@{repo}")).unwrap()
    }

    async fn cache() -> Arc<dyn BlockCache> {
        let backend = CacheBackend::ephemeral();
        backend.open("r").await.unwrap();
        // The view keeps the session alive after the backend value is gone.
        Arc::new(backend.view())
    }

    async fn open(engine: &InMemoryEngine, repo: &str) -> Box<dyn NativeRepo> {
        engine
            .open_repo(&uri(repo), "pwd", &RepoOptions::new().create(true), cache().await)
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // Repository lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn open_close_reopen() {
        let engine = InMemoryEngine::new();
        let u = uri("repo");
        assert!(!engine.exists(&u).unwrap());

        let mut repo = open(&engine, "repo").await;
        assert!(engine.exists(&u).unwrap());
        // One open instance per repository.
        let again = engine.open_repo(&u, "pwd", &RepoOptions::new(), cache().await);
        assert!(matches!(again, Err(EngineError::RepoOpened(_))));

        repo.close().unwrap();
        repo.close().unwrap();
        assert!(matches!(repo.info(), Err(EngineError::Closed)));

        let reopened = engine.open_repo(&u, "pwd", &RepoOptions::new(), cache().await);
        assert!(reopened.is_ok());
    }

    #[tokio::test]
    async fn open_flags() {
        let engine = InMemoryEngine::new();
        let u = uri("flags");
        let missing = engine.open_repo(&u, "pwd", &RepoOptions::new(), cache().await);
        assert!(matches!(missing, Err(EngineError::RepoNotFound(_))));

        open(&engine, "flags").await.close().unwrap();
        let dup = engine.open_repo(&u, "pwd", &RepoOptions::new().create_new(true), cache().await);
        assert!(matches!(dup, Err(EngineError::RepoExists(_))));

        let wrong = engine.open_repo(&u, "nope", &RepoOptions::new(), cache().await);
        assert!(matches!(wrong, Err(EngineError::WrongPassword)));

        let bad_scheme = RepoUri::parse("zbox://k@flags").unwrap();
        let err = engine.open_repo(&bad_scheme, "pwd", &RepoOptions::new(), cache().await);
        assert!(matches!(err, Err(EngineError::UnsupportedStorage(_))));
    }

    #[tokio::test]
    async fn reset_password_and_repair() {
        let engine = InMemoryEngine::new();
        let u = uri("pw");
        let mut repo = open(&engine, "pw").await;
        assert!(matches!(repo.reset_password("bad", "new"), Err(EngineError::WrongPassword)));
        repo.reset_password("pwd", "new").unwrap();
        assert!(matches!(engine.repair_super_block(&u, "new"), Err(EngineError::RepoOpened(_))));
        repo.close().unwrap();

        assert!(engine.open_repo(&u, "pwd", &RepoOptions::new(), cache().await).is_err());
        engine.repair_super_block(&u, "new").unwrap();
        assert!(engine.repair_super_block(&u, "pwd").is_err());
    }

    #[tokio::test]
    async fn destroy_requires_closed() {
        let engine = InMemoryEngine::new();
        let u = uri("gone");
        let mut repo = open(&engine, "gone").await;
        assert!(engine.destroy(&u).is_err());
        repo.close().unwrap();
        engine.destroy(&u).unwrap();
        assert!(!engine.exists(&u).unwrap());
        assert_eq!(engine.repo_count(), 0);
    }

    #[tokio::test]
    async fn info_defaults() {
        let engine = InMemoryEngine::new();
        let repo = open(&engine, "info").await;
        let info = repo.info().unwrap();
        assert!(info.dedup_chunk);
        assert!(!info.compress);
        assert!(!info.is_read_only);
        assert_eq!(info.version_limit, 10);
        assert_eq!(info.uri, "mem://key@info");
    }

    #[tokio::test]
    async fn read_only_rejects_mutation() {
        let engine = InMemoryEngine::new();
        open(&engine, "ro").await.close().unwrap();
        let mut repo = engine
            .open_repo(&uri("ro"), "pwd", &RepoOptions::new().read_only(true), cache().await)
            .unwrap();
        assert!(matches!(repo.create_file("/foo").err(), Some(EngineError::ReadOnly)));
        assert!(matches!(repo.create_dir("/d"), Err(EngineError::ReadOnly)));
        assert!(repo.info().unwrap().is_read_only);
        assert!(repo.read_dir("/").unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Namespace
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn dirs() {
        let engine = InMemoryEngine::new();
        let mut repo = open(&engine, "dirs").await;
        assert!(matches!(repo.create_dir("/"), Err(EngineError::IsRoot)));
        repo.create_dir("/a").unwrap();
        assert!(repo.is_dir("/a").unwrap());
        assert!(!repo.is_file("/a").unwrap());
        assert!(repo.read_dir("/a").unwrap().is_empty());

        repo.create_dir_all("/1/2/3/x").unwrap();
        let entries = repo.read_dir("/1/2/3").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/1/2/3/x");
        assert_eq!(entries[0].file_name, "x");

        assert!(matches!(repo.remove_dir("/"), Err(EngineError::IsRoot)));
        assert!(matches!(repo.remove_dir("/none"), Err(EngineError::NotFound(_))));
        assert!(matches!(repo.remove_dir("1/2/3"), Err(EngineError::InvalidPath(_))));
        assert!(matches!(repo.remove_dir("/1"), Err(EngineError::NotEmpty(_))));
        repo.remove_dir("/1/2/3/x").unwrap();
        repo.remove_dir("/1/2/3").unwrap();
        repo.remove_dir_all("/1").unwrap();
        assert!(!repo.path_exists("/1/2").unwrap());
        assert!(repo.read_dir("/1").is_err());
        assert!(repo.path_exists("/").unwrap());
    }

    #[tokio::test]
    async fn copy_remove_rename() {
        let engine = InMemoryEngine::new();
        let mut repo = open(&engine, "fs").await;
        repo.create_file("/f").unwrap().close().unwrap();

        let meta = repo.metadata("/f").unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.curr_version, 1);
        assert_eq!(meta.content_len, 0);
        assert_eq!(repo.history("/f").unwrap().len(), 1);

        repo.copy("/f", "/f.copy").unwrap();
        assert!(repo.is_file("/f.copy").unwrap());
        repo.copy("/f", "/f").unwrap();

        repo.remove_file("/f").unwrap();
        assert!(repo.remove_file("/f").is_err());

        repo.create_file("/f").unwrap().close().unwrap();
        repo.rename("/f", "/f.new").unwrap();
        // Source is gone and the target exists.
        assert!(repo.rename("/f", "/f.new").is_err());
        repo.create_file("/g").unwrap().close().unwrap();
        assert!(matches!(repo.rename("/g", "/f.new"), Err(EngineError::AlreadyExists(_))));
    }

    // -----------------------------------------------------------------------
    // Files through the repository
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn version_numbering() {
        let engine = InMemoryEngine::new();
        let mut repo = open(&engine, "ver").await;
        let mut file = repo
            .open_file("/f", &FileOptions::new().create(true))
            .unwrap();
        assert_eq!(file.curr_version().unwrap(), 1);
        file.write_once(&[1, 2, 3]).unwrap();
        assert_eq!(file.curr_version().unwrap(), 2);
        file.close().unwrap();

        let mut file = repo.open_file("/f", &FileOptions::new().write(true)).unwrap();
        assert_eq!(file.write(&[4, 5]).unwrap(), 2);
        assert_eq!(file.write(&[6]).unwrap(), 1);
        file.finish().unwrap();
        assert_eq!(file.curr_version().unwrap(), 3);

        let mut older = file.version_reader(2).unwrap();
        assert_eq!(older.read_all().unwrap(), vec![1, 2, 3]);
        let mut newest = file.version_reader(3).unwrap();
        assert_eq!(newest.read_all().unwrap(), vec![4, 5, 6]);
        assert!(matches!(file.version_reader(9).err(), Some(EngineError::NoVersion(9))));

        let hist = file.history().unwrap();
        assert_eq!(hist.len(), 3);
        assert_eq!(hist[2].num, 3);
        assert_eq!(hist[2].content_len, 3);

        let mut seek = file.version_reader(2).unwrap();
        seek.seek(SeekFrom::Start(1)).unwrap();
        assert_eq!(seek.read_all().unwrap(), vec![2, 3]);
    }

    #[tokio::test]
    async fn open_file_flags() {
        let engine = InMemoryEngine::new();
        let mut repo = open(&engine, "ff").await;
        assert!(matches!(
            repo.open_file("/none", &FileOptions::new()).err(),
            Some(EngineError::NotFound(_))
        ));
        repo.create_file("/f").unwrap().write_once(&[1, 2, 3]).unwrap();
        assert!(matches!(
            repo.open_file("/f", &FileOptions::new().create_new(true)).err(),
            Some(EngineError::AlreadyExists(_))
        ));

        // Read-only file rejects writes.
        let mut ro = repo.open_file("/f", &FileOptions::new()).unwrap();
        assert!(matches!(ro.write(&[1]), Err(EngineError::CannotWrite)));

        // Append writes at the end.
        let mut app = repo.open_file("/f", &FileOptions::new().append(true)).unwrap();
        app.write_once(&[4]).unwrap();
        app.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(app.read_all().unwrap(), vec![1, 2, 3, 4]);

        // Truncate commits an empty version.
        let mut tr = repo.open_file("/f", &FileOptions::new().truncate(true)).unwrap();
        assert!(tr.read_all().unwrap().is_empty());
        assert!(repo.create_dir("/f/x").is_err());
    }

    #[tokio::test]
    async fn closing_repo_invalidates_files() {
        let engine = InMemoryEngine::new();
        let mut repo = open(&engine, "inv").await;
        let mut file = repo.create_file("/f").unwrap();
        repo.close().unwrap();
        assert!(matches!(file.read_all(), Err(EngineError::Closed)));
    }

    #[tokio::test]
    async fn open_file_survives_rename() {
        let engine = InMemoryEngine::new();
        let mut repo = open(&engine, "mv").await;
        let mut file = repo.create_file("/a").unwrap();
        repo.rename("/a", "/b").unwrap();
        file.write_once(b"x").unwrap();
        assert_eq!(repo.metadata("/b").unwrap().content_len, 1);
    }
}
