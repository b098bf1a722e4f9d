use std::collections::{BTreeMap, HashMap, VecDeque};

use coffer_cache::BlockCache;
use coffer_types::{unix_now, DirEntry, FileType, Metadata, RepoOptions, Version};
use rand::Rng;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::path::{self, ROOT};

pub(crate) type NodeId = u64;

pub(crate) const DEFAULT_VERSION_LIMIT: u8 = 10;

/// Cache key of a content blob.
pub(crate) fn blob_key(digest: &str) -> String {
    format!("data/{digest}")
}

fn digest_of(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

fn hash_password(salt: &[u8; 16], pwd: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt);
    hasher.update(pwd.as_bytes());
    hasher.finalize()
}

#[derive(Clone, Debug)]
pub(crate) struct StoredVersion {
    pub num: u64,
    pub len: u64,
    pub digest: String,
    pub created_at: u64,
}

impl StoredVersion {
    pub fn to_version(&self) -> Version {
        Version {
            num: self.num,
            content_len: self.len,
            created_at: self.created_at,
        }
    }
}

pub(crate) enum NodeKind {
    Dir,
    File {
        versions: VecDeque<StoredVersion>,
        version_limit: u8,
    },
}

pub(crate) struct Node {
    pub kind: NodeKind,
    pub created_at: u64,
    pub modified_at: u64,
}

struct Blob {
    data: Vec<u8>,
    refs: usize,
}

/// One repository held by the in-memory engine.
///
/// Paths map to node ids so that renaming a file keeps open handles on it
/// valid. File content is stored once per distinct BLAKE3 digest and shared
/// by every version that has it.
pub(crate) struct Volume {
    pub id: String,
    pub uri: String,
    pub created_at: u64,
    pub compress: bool,
    pub version_limit: u8,
    pub dedup_chunk: bool,
    pub opened: bool,
    salt: [u8; 16],
    pwd_digest: blake3::Hash,
    paths: BTreeMap<String, NodeId>,
    nodes: HashMap<NodeId, Node>,
    next_node: NodeId,
    blobs: HashMap<String, Blob>,
}

impl Volume {
    pub fn new(uri: &str, pwd: &str, opts: &RepoOptions) -> Self {
        let now = unix_now();
        let mut salt = [0u8; 16];
        rand::thread_rng().fill(&mut salt);

        let mut volume = Self {
            id: uuid::Uuid::now_v7().to_string(),
            uri: uri.to_string(),
            created_at: now,
            compress: opts.compress.unwrap_or(false),
            version_limit: opts.version_limit.unwrap_or(DEFAULT_VERSION_LIMIT),
            dedup_chunk: opts.dedup_chunk.unwrap_or(true),
            opened: false,
            pwd_digest: hash_password(&salt, pwd),
            salt,
            paths: BTreeMap::new(),
            nodes: HashMap::new(),
            next_node: 0,
            blobs: HashMap::new(),
        };
        volume.insert_node(ROOT.to_string(), NodeKind::Dir);
        volume
    }

    // -----------------------------------------------------------------------
    // Password
    // -----------------------------------------------------------------------

    pub fn verify_password(&self, pwd: &str) -> EngineResult<()> {
        if hash_password(&self.salt, pwd) == self.pwd_digest {
            Ok(())
        } else {
            Err(EngineError::WrongPassword)
        }
    }

    pub fn set_password(&mut self, pwd: &str) {
        rand::thread_rng().fill(&mut self.salt);
        self.pwd_digest = hash_password(&self.salt, pwd);
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn lookup(&self, path: &str) -> EngineResult<NodeId> {
        self.paths
            .get(path)
            .copied()
            .ok_or_else(|| EngineError::NotFound(path.to_string()))
    }

    pub fn node(&self, id: NodeId) -> EngineResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| EngineError::NotFound(format!("node {id}")))
    }

    fn node_mut(&mut self, id: NodeId) -> EngineResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("node {id}")))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.paths.contains_key(path)
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.paths
            .get(path)
            .and_then(|id| self.nodes.get(id))
            .is_some_and(|n| matches!(n.kind, NodeKind::File { .. }))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.paths
            .get(path)
            .and_then(|id| self.nodes.get(id))
            .is_some_and(|n| matches!(n.kind, NodeKind::Dir))
    }

    /// Id of the file at `path`.
    pub fn file_id(&self, path: &str) -> EngineResult<NodeId> {
        let id = self.lookup(path)?;
        match self.node(id)?.kind {
            NodeKind::File { .. } => Ok(id),
            NodeKind::Dir => Err(EngineError::NotFile(path.to_string())),
        }
    }

    fn dir_id(&self, path: &str) -> EngineResult<NodeId> {
        let id = self.lookup(path)?;
        match self.node(id)?.kind {
            NodeKind::Dir => Ok(id),
            NodeKind::File { .. } => Err(EngineError::NotDir(path.to_string())),
        }
    }

    fn versions(&self, id: NodeId) -> EngineResult<&VecDeque<StoredVersion>> {
        match &self.node(id)?.kind {
            NodeKind::File { versions, .. } => Ok(versions),
            NodeKind::Dir => Err(EngineError::NotFile(format!("node {id}"))),
        }
    }

    pub fn current_version(&self, id: NodeId) -> EngineResult<&StoredVersion> {
        self.versions(id)?.back().ok_or(EngineError::NoVersion(0))
    }

    pub fn find_version(&self, id: NodeId, num: u64) -> EngineResult<&StoredVersion> {
        self.versions(id)?
            .iter()
            .find(|v| v.num == num)
            .ok_or(EngineError::NoVersion(num))
    }

    pub fn metadata_of(&self, id: NodeId) -> EngineResult<Metadata> {
        let node = self.node(id)?;
        let (file_type, content_len, curr_version) = match &node.kind {
            NodeKind::Dir => (FileType::Dir, 0, 0),
            NodeKind::File { versions, .. } => {
                let curr = versions.back();
                (
                    FileType::File,
                    curr.map_or(0, |v| v.len),
                    curr.map_or(0, |v| v.num),
                )
            }
        };
        Ok(Metadata {
            file_type,
            content_len,
            curr_version,
            created_at: node.created_at,
            modified_at: node.modified_at,
        })
    }

    pub fn history_of(&self, id: NodeId) -> EngineResult<Vec<Version>> {
        Ok(self.versions(id)?.iter().map(StoredVersion::to_version).collect())
    }

    pub fn read_dir(&self, path: &str) -> EngineResult<Vec<DirEntry>> {
        self.dir_id(path)?;
        let prefix = path::child_prefix(path);
        let mut entries = Vec::new();
        for (child, id) in self.paths.range(prefix.clone()..) {
            let Some(rest) = child.strip_prefix(&prefix) else {
                break;
            };
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            entries.push(DirEntry {
                path: child.clone(),
                file_name: rest.to_string(),
                metadata: self.metadata_of(*id)?,
            });
        }
        Ok(entries)
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    fn put_blob(&mut self, data: Vec<u8>, cache: &dyn BlockCache) -> String {
        let digest = digest_of(&data);
        cache.insert(&blob_key(&digest), data.clone());
        self.blobs
            .entry(digest.clone())
            .and_modify(|b| b.refs += 1)
            .or_insert(Blob { data, refs: 1 });
        digest
    }

    fn retain_blob(&mut self, digest: &str) {
        if let Some(blob) = self.blobs.get_mut(digest) {
            blob.refs += 1;
        }
    }

    fn release_blob(&mut self, digest: &str, cache: &dyn BlockCache) {
        let gone = match self.blobs.get_mut(digest) {
            Some(blob) => {
                blob.refs = blob.refs.saturating_sub(1);
                blob.refs == 0
            }
            None => false,
        };
        if gone {
            self.blobs.remove(digest);
            cache.remove(&blob_key(digest));
        }
    }

    /// Content of a blob, served from the block cache when it holds an intact
    /// copy and loaded into it otherwise.
    pub fn read_blob(&self, digest: &str, cache: &dyn BlockCache) -> EngineResult<Vec<u8>> {
        let key = blob_key(digest);
        if let Some(data) = cache.get(&key) {
            if digest_of(&data) == digest {
                return Ok(data);
            }
            debug!(%key, "stale block cache entry replaced");
        }
        let data = self
            .blobs
            .get(digest)
            .map(|b| b.data.clone())
            .ok_or_else(|| EngineError::NotFound(key.clone()))?;
        cache.insert(&key, data.clone());
        Ok(data)
    }

    pub fn current_content(&self, id: NodeId, cache: &dyn BlockCache) -> EngineResult<Vec<u8>> {
        let digest = &self.current_version(id)?.digest;
        self.read_blob(digest, cache)
    }

    /// Commit `content` as the newest version of file `id`, pruning versions
    /// beyond the file's limit. Returns the new version number.
    pub fn commit(&mut self, id: NodeId, content: Vec<u8>, cache: &dyn BlockCache) -> EngineResult<u64> {
        self.node(id)?;
        let len = content.len() as u64;
        let digest = self.put_blob(content, cache);
        let now = unix_now();

        let node = self.node_mut(id)?;
        node.modified_at = now;
        let NodeKind::File { versions, version_limit } = &mut node.kind else {
            return Err(EngineError::NotFile(format!("node {id}")));
        };
        let num = versions.back().map_or(1, |v| v.num + 1);
        versions.push_back(StoredVersion {
            num,
            len,
            digest,
            created_at: now,
        });
        let mut pruned = Vec::new();
        while versions.len() > usize::from(*version_limit).max(1) {
            if let Some(old) = versions.pop_front() {
                pruned.push(old.digest);
            }
        }
        for digest in pruned {
            self.release_blob(&digest, cache);
        }
        debug!(node = id, num, len, "version committed");
        Ok(num)
    }

    // -----------------------------------------------------------------------
    // Namespace
    // -----------------------------------------------------------------------

    fn insert_node(&mut self, path: String, kind: NodeKind) -> NodeId {
        let now = unix_now();
        let id = self.next_node;
        self.next_node += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                created_at: now,
                modified_at: now,
            },
        );
        self.touch_parent(&path);
        self.paths.insert(path, id);
        id
    }

    fn touch_parent(&mut self, path: &str) {
        let now = unix_now();
        if let Some(id) = path::parent(path).and_then(|p| self.paths.get(p)).copied() {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.modified_at = now;
            }
        }
    }

    /// Check that `path` can be created: not the root, not taken, parent is
    /// an existing directory.
    fn check_creatable(&self, path: &str) -> EngineResult<()> {
        let parent = path::parent(path).ok_or(EngineError::IsRoot)?;
        if self.exists(path) {
            return Err(EngineError::AlreadyExists(path.to_string()));
        }
        self.dir_id(parent)?;
        Ok(())
    }

    pub fn create_dir(&mut self, path: &str) -> EngineResult<()> {
        self.check_creatable(path)?;
        self.insert_node(path.to_string(), NodeKind::Dir);
        Ok(())
    }

    pub fn create_dir_all(&mut self, path: &str) -> EngineResult<()> {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            if self.exists(&current) {
                self.dir_id(&current)?;
            } else {
                self.insert_node(current.clone(), NodeKind::Dir);
            }
        }
        Ok(())
    }

    /// Create a file whose first version holds `initial`.
    pub fn create_file(
        &mut self,
        path: &str,
        version_limit: Option<u8>,
        initial: Vec<u8>,
        cache: &dyn BlockCache,
    ) -> EngineResult<NodeId> {
        self.check_creatable(path)?;
        let id = self.insert_node(
            path.to_string(),
            NodeKind::File {
                versions: VecDeque::new(),
                version_limit: version_limit.unwrap_or(self.version_limit),
            },
        );
        self.commit(id, initial, cache)?;
        Ok(id)
    }

    fn drop_node(&mut self, id: NodeId, cache: &dyn BlockCache) {
        if let Some(node) = self.nodes.remove(&id) {
            if let NodeKind::File { versions, .. } = node.kind {
                for v in versions {
                    self.release_blob(&v.digest, cache);
                }
            }
        }
    }

    pub fn remove_file(&mut self, path: &str, cache: &dyn BlockCache) -> EngineResult<()> {
        let id = self.file_id(path)?;
        self.paths.remove(path);
        self.touch_parent(path);
        self.drop_node(id, cache);
        Ok(())
    }

    pub fn remove_dir(&mut self, path: &str) -> EngineResult<()> {
        if path == ROOT {
            return Err(EngineError::IsRoot);
        }
        let id = self.dir_id(path)?;
        if !self.subtree(path).is_empty() {
            return Err(EngineError::NotEmpty(path.to_string()));
        }
        self.paths.remove(path);
        self.nodes.remove(&id);
        self.touch_parent(path);
        Ok(())
    }

    pub fn remove_dir_all(&mut self, path: &str, cache: &dyn BlockCache) -> EngineResult<()> {
        if path == ROOT {
            return Err(EngineError::IsRoot);
        }
        let id = self.dir_id(path)?;
        for (child, child_id) in self.subtree(path) {
            self.paths.remove(&child);
            self.drop_node(child_id, cache);
        }
        self.paths.remove(path);
        self.nodes.remove(&id);
        self.touch_parent(path);
        Ok(())
    }

    /// Strict descendants of `dir`, parents before children.
    fn subtree(&self, dir: &str) -> Vec<(String, NodeId)> {
        let prefix = path::child_prefix(dir);
        self.paths
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter(|(p, _)| p.as_str() != dir)
            .map(|(p, id)| (p.clone(), *id))
            .collect()
    }

    pub fn rename(&mut self, from: &str, to: &str) -> EngineResult<()> {
        if from == ROOT || to == ROOT {
            return Err(EngineError::IsRoot);
        }
        let id = self.lookup(from)?;
        if path::is_within(to, from) {
            return Err(EngineError::InvalidPath(format!("cannot move {from} into {to}")));
        }
        self.check_creatable(to)?;

        let moved = self.subtree(from);
        self.paths.remove(from);
        self.touch_parent(from);
        for (child, child_id) in moved {
            self.paths.remove(&child);
            let suffix = &child[from.len()..];
            self.paths.insert(format!("{to}{suffix}"), child_id);
        }
        self.touch_parent(to);
        self.paths.insert(to.to_string(), id);
        Ok(())
    }

    pub fn copy(&mut self, from: &str, to: &str, cache: &dyn BlockCache) -> EngineResult<()> {
        let src = self.file_id(from)?;
        if from == to {
            return Ok(());
        }
        let content = self.current_content(src, cache)?;
        if self.exists(to) {
            let dst = self.file_id(to)?;
            self.commit(dst, content, cache)?;
        } else {
            let limit = match &self.node(src)?.kind {
                NodeKind::File { version_limit, .. } => Some(*version_limit),
                NodeKind::Dir => None,
            };
            self.create_file(to, limit, content, cache)?;
        }
        Ok(())
    }

    pub fn copy_dir_all(&mut self, from: &str, to: &str, cache: &dyn BlockCache) -> EngineResult<()> {
        if to == ROOT {
            return Err(EngineError::IsRoot);
        }
        self.dir_id(from)?;
        if path::is_within(to, from) {
            return Err(EngineError::InvalidPath(format!("cannot copy {from} into {to}")));
        }
        self.check_creatable(to)?;

        let items = self.subtree(from);
        self.insert_node(to.to_string(), NodeKind::Dir);
        for (child, child_id) in items {
            let target = format!("{to}{}", &child[from.len()..]);
            let file = match &self.node(child_id)?.kind {
                NodeKind::Dir => None,
                NodeKind::File { versions, version_limit } => {
                    Some((*version_limit, versions.back().cloned()))
                }
            };
            let Some((version_limit, current)) = file else {
                self.insert_node(target, NodeKind::Dir);
                continue;
            };
            // The copy starts its history at the source's current content.
            let mut versions = VecDeque::new();
            if let Some(v) = current {
                self.retain_blob(&v.digest);
                versions.push_back(StoredVersion { num: 1, ..v });
            }
            self.insert_node(target, NodeKind::File { versions, version_limit });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_cache::CacheBackend;

    struct NoCache;

    impl BlockCache for NoCache {
        fn contains(&self, _key: &str) -> bool {
            false
        }
        fn get(&self, _key: &str) -> Option<Vec<u8>> {
            None
        }
        fn insert(&self, _key: &str, _data: Vec<u8>) {}
        fn remove(&self, _key: &str) {}
    }

    fn volume() -> Volume {
        Volume::new("mem://k@r", "pwd", &RepoOptions::default())
    }

    #[test]
    fn defaults() {
        let v = volume();
        assert_eq!(v.version_limit, DEFAULT_VERSION_LIMIT);
        assert!(v.dedup_chunk);
        assert!(!v.compress);
        assert!(v.is_dir("/"));
    }

    #[test]
    fn password_check() {
        let mut v = volume();
        v.verify_password("pwd").unwrap();
        assert_eq!(v.verify_password("nope"), Err(EngineError::WrongPassword));
        v.set_password("new");
        v.verify_password("new").unwrap();
        assert!(v.verify_password("pwd").is_err());
    }

    #[test]
    fn versions_are_pruned_to_limit() {
        let mut v = Volume::new("mem://k@r", "pwd", &RepoOptions::new().version_limit(2));
        let id = v.create_file("/f", None, Vec::new(), &NoCache).unwrap();
        v.commit(id, vec![1], &NoCache).unwrap();
        v.commit(id, vec![2], &NoCache).unwrap();
        let nums: Vec<u64> = v.history_of(id).unwrap().iter().map(|h| h.num).collect();
        assert_eq!(nums, vec![2, 3]);
        assert_eq!(v.find_version(id, 1).unwrap_err(), EngineError::NoVersion(1));
    }

    #[test]
    fn identical_content_shares_a_blob() {
        let mut v = volume();
        let a = v.create_file("/a", None, vec![7; 4], &NoCache).unwrap();
        v.create_file("/b", None, vec![7; 4], &NoCache).unwrap();
        assert_eq!(v.blobs.len(), 1);
        v.remove_file("/b", &NoCache).unwrap();
        assert_eq!(v.current_content(a, &NoCache).unwrap(), vec![7; 4]);
    }

    #[tokio::test]
    async fn blobs_flow_through_block_cache() {
        let cache = CacheBackend::ephemeral();
        cache.open("r").await.unwrap();
        let view = cache.view();

        let mut v = volume();
        let id = v.create_file("/f", None, b"hello".to_vec(), &view).unwrap();
        let key = blob_key(&digest_of(b"hello"));
        assert_eq!(cache.get(&key), Some(b"hello".to_vec()));

        // A miss repopulates the cache.
        cache.remove(&key);
        assert_eq!(v.current_content(id, &view).unwrap(), b"hello".to_vec());
        assert!(cache.contains(&key));

        // A damaged entry is ignored and replaced.
        cache.insert(&key, b"junk".to_vec()).unwrap();
        assert_eq!(v.current_content(id, &view).unwrap(), b"hello".to_vec());
        assert_eq!(cache.get(&key), Some(b"hello".to_vec()));

        v.remove_file("/f", &view).unwrap();
        assert!(!cache.contains(&key));
    }

    #[test]
    fn rename_moves_subtree_and_keeps_ids() {
        let mut v = volume();
        v.create_dir_all("/a/b").unwrap();
        let id = v.create_file("/a/b/f", None, vec![1], &NoCache).unwrap();
        v.rename("/a", "/z").unwrap();
        assert!(!v.exists("/a/b/f"));
        assert_eq!(v.lookup("/z/b/f").unwrap(), id);
        assert!(v.rename("/z", "/z/inner").is_err());
    }

    #[test]
    fn read_dir_lists_direct_children_only() {
        let mut v = volume();
        v.create_dir_all("/1/2/3").unwrap();
        v.create_file("/1/f", None, Vec::new(), &NoCache).unwrap();
        let names: Vec<String> = v.read_dir("/1").unwrap().into_iter().map(|e| e.file_name).collect();
        assert_eq!(names, vec!["2".to_string(), "f".to_string()]);
        assert_eq!(v.read_dir("/").unwrap().len(), 1);
    }

    #[test]
    fn copy_dir_all_duplicates_tree() {
        let mut v = volume();
        v.create_dir_all("/src/sub").unwrap();
        v.create_file("/src/sub/f", None, vec![5, 6], &NoCache).unwrap();
        v.copy_dir_all("/src", "/dst", &NoCache).unwrap();
        let id = v.file_id("/dst/sub/f").unwrap();
        assert_eq!(v.current_content(id, &NoCache).unwrap(), vec![5, 6]);
        assert_eq!(v.current_version(id).unwrap().num, 1);
        // The source survives removal of the copy.
        v.remove_dir_all("/dst", &NoCache).unwrap();
        let src = v.file_id("/src/sub/f").unwrap();
        assert_eq!(v.current_content(src, &NoCache).unwrap(), vec![5, 6]);
    }
}
