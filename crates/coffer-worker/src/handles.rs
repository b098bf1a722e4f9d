use coffer_cache::CacheBackend;
use coffer_engine::{NativeFile, NativeRepo, NativeVersionReader};
use coffer_protocol::Scope;
use coffer_types::{Handle, RepoUri};

use crate::arena::Arena;
use crate::error::{DispatchError, DispatchResult};

/// A live repository and the cache backend it was opened with.
pub struct RepoEntry {
    pub uri: RepoUri,
    pub native: Box<dyn NativeRepo>,
    pub cache: CacheBackend,
}

pub struct FileEntry {
    pub repo: Handle,
    pub native: Box<dyn NativeFile>,
}

pub struct ReaderEntry {
    pub repo: Handle,
    pub file: Handle,
    pub native: Box<dyn NativeVersionReader>,
}

/// Children detached from a repository being closed.
#[derive(Default)]
pub struct Orphans {
    pub files: Vec<(Handle, FileEntry)>,
    pub readers: Vec<(Handle, ReaderEntry)>,
}

impl Orphans {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.readers.is_empty()
    }
}

/// Worker-side map from handle to live native object, one arena per scope.
///
/// Every file and version reader remembers the repository it came from so
/// a repository close can invalidate them.
#[derive(Default)]
pub struct HandleTable {
    repos: Arena<RepoEntry>,
    files: Arena<FileEntry>,
    readers: Arena<ReaderEntry>,
}

fn not_found(scope: Scope, handle: Handle) -> DispatchError {
    DispatchError::HandleNotFound { scope, handle }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live handle counts as `(repos, files, readers)`.
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.repos.len(), self.files.len(), self.readers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.counts() == (0, 0, 0)
    }

    // ---- Repositories ----

    pub fn insert_repo(&mut self, entry: RepoEntry) -> Handle {
        self.repos.insert(entry)
    }

    pub fn repo(&mut self, handle: Handle) -> DispatchResult<&mut RepoEntry> {
        self.repos
            .get_mut(handle)
            .ok_or_else(|| not_found(Scope::Repo, handle))
    }

    /// Remove a repository along with every file and reader opened from it.
    pub fn remove_repo(&mut self, handle: Handle) -> Option<(RepoEntry, Orphans)> {
        let entry = self.repos.remove(handle)?;
        let mut orphans = Orphans::default();
        for h in self.readers.find(|r| r.repo == handle) {
            if let Some(r) = self.readers.remove(h) {
                orphans.readers.push((h, r));
            }
        }
        for h in self.files.find(|f| f.repo == handle) {
            if let Some(f) = self.files.remove(h) {
                orphans.files.push((h, f));
            }
        }
        Some((entry, orphans))
    }

    // ---- Files ----

    pub fn insert_file(&mut self, repo: Handle, native: Box<dyn NativeFile>) -> Handle {
        self.files.insert(FileEntry { repo, native })
    }

    pub fn file(&mut self, handle: Handle) -> DispatchResult<&mut FileEntry> {
        self.files
            .get_mut(handle)
            .ok_or_else(|| not_found(Scope::File, handle))
    }

    pub fn remove_file(&mut self, handle: Handle) -> Option<FileEntry> {
        self.files.remove(handle)
    }

    // ---- Version readers ----

    pub fn insert_reader(&mut self, repo: Handle, file: Handle, native: Box<dyn NativeVersionReader>) -> Handle {
        self.readers.insert(ReaderEntry { repo, file, native })
    }

    pub fn reader(&mut self, handle: Handle) -> DispatchResult<&mut ReaderEntry> {
        self.readers
            .get_mut(handle)
            .ok_or_else(|| not_found(Scope::VersionReader, handle))
    }

    pub fn remove_reader(&mut self, handle: Handle) -> Option<ReaderEntry> {
        self.readers.remove(handle)
    }

    /// Empty the table, returning every repository with its children.
    pub fn drain(&mut self) -> Vec<(Handle, RepoEntry, Orphans)> {
        let handles: Vec<Handle> = self.repos.iter().map(|(h, _)| h).collect();
        handles
            .into_iter()
            .filter_map(|h| self.remove_repo(h).map(|(e, o)| (h, e, o)))
            .collect()
    }
}
