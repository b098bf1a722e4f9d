use std::io::SeekFrom;
use std::sync::Arc;

use coffer_cache::BlockCache;
use coffer_types::{DirEntry, FileOptions, Metadata, RepoInfo, RepoOptions, RepoUri, Version};

use crate::error::EngineResult;

/// Entry point of a storage engine.
///
/// All implementations must satisfy these invariants:
/// - A repository is opened by at most one [`NativeRepo`] at a time.
/// - Objects returned by an open call stay usable until closed, or until the
///   repository they came from is closed; after that every call fails.
/// - Engines never block on the calling context. They are driven from a
///   single worker thread, one call at a time.
pub trait Engine: Send {
    /// Engine version string.
    fn version(&self) -> String;

    /// Whether a repository exists at `uri`.
    fn exists(&self, uri: &RepoUri) -> EngineResult<bool>;

    /// Open (and, depending on `opts`, create) the repository at `uri`.
    ///
    /// `cache` is the repository's block cache for the lifetime of the
    /// returned handle.
    fn open_repo(
        &self,
        uri: &RepoUri,
        pwd: &str,
        opts: &RepoOptions,
        cache: Arc<dyn BlockCache>,
    ) -> EngineResult<Box<dyn NativeRepo>>;

    /// Rebuild the repository's super block. The repository must be closed.
    fn repair_super_block(&self, uri: &RepoUri, pwd: &str) -> EngineResult<()>;

    /// Permanently remove the repository at `uri`.
    fn destroy(&self, uri: &RepoUri) -> EngineResult<()>;
}

/// An open repository.
pub trait NativeRepo: Send {
    fn info(&self) -> EngineResult<RepoInfo>;
    fn reset_password(&mut self, old_pwd: &str, new_pwd: &str) -> EngineResult<()>;

    fn path_exists(&self, path: &str) -> EngineResult<bool>;
    fn is_file(&self, path: &str) -> EngineResult<bool>;
    fn is_dir(&self, path: &str) -> EngineResult<bool>;

    /// Create a file for writing, truncating it if it already exists.
    fn create_file(&mut self, path: &str) -> EngineResult<Box<dyn NativeFile>>;
    fn open_file(&mut self, path: &str, opts: &FileOptions) -> EngineResult<Box<dyn NativeFile>>;

    fn create_dir(&mut self, path: &str) -> EngineResult<()>;
    fn create_dir_all(&mut self, path: &str) -> EngineResult<()>;
    fn read_dir(&self, path: &str) -> EngineResult<Vec<DirEntry>>;
    fn metadata(&self, path: &str) -> EngineResult<Metadata>;
    fn history(&self, path: &str) -> EngineResult<Vec<Version>>;

    fn copy(&mut self, from: &str, to: &str) -> EngineResult<()>;
    fn copy_dir_all(&mut self, from: &str, to: &str) -> EngineResult<()>;
    fn remove_file(&mut self, path: &str) -> EngineResult<()>;
    fn remove_dir(&mut self, path: &str) -> EngineResult<()>;
    fn remove_dir_all(&mut self, path: &str) -> EngineResult<()>;
    fn rename(&mut self, from: &str, to: &str) -> EngineResult<()>;

    /// Close the repository. Closing twice is a no-op.
    fn close(&mut self) -> EngineResult<()>;
}

/// An open file. Reads and writes share one cursor.
pub trait NativeFile: Send {
    /// Read into `buf` from the cursor. Returns the number of bytes read,
    /// zero once the cursor is at or past the end.
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize>;
    /// Read from the cursor to the end.
    fn read_all(&mut self) -> EngineResult<Vec<u8>>;

    /// Stage `data` at the cursor. Staged bytes become a version on `finish`.
    fn write(&mut self, data: &[u8]) -> EngineResult<usize>;
    /// Commit staged writes as a new version.
    fn finish(&mut self) -> EngineResult<()>;
    /// `write` followed by `finish`.
    fn write_once(&mut self, data: &[u8]) -> EngineResult<()>;

    fn seek(&mut self, pos: SeekFrom) -> EngineResult<u64>;
    /// Truncate or zero-extend the content, committing a new version.
    fn set_len(&mut self, len: u64) -> EngineResult<()>;

    fn curr_version(&self) -> EngineResult<u64>;
    fn metadata(&self) -> EngineResult<Metadata>;
    fn history(&self) -> EngineResult<Vec<Version>>;
    fn version_reader(&self, num: u64) -> EngineResult<Box<dyn NativeVersionReader>>;

    /// Close the file, discarding unfinished writes.
    fn close(&mut self) -> EngineResult<()>;
}

/// Read-only cursor over one retained version of a file.
pub trait NativeVersionReader: Send {
    fn version(&self) -> EngineResult<Version>;
    fn read(&mut self, buf: &mut [u8]) -> EngineResult<usize>;
    fn read_all(&mut self) -> EngineResult<Vec<u8>>;
    fn seek(&mut self, pos: SeekFrom) -> EngineResult<u64>;
    fn close(&mut self) -> EngineResult<()>;
}
