use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time in Unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Kind of a repository entry. Serialized as `"File"` / `"Dir"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    File,
    Dir,
}

/// Metadata of a file or directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub file_type: FileType,
    /// Length of the current version's content. Zero for directories.
    pub content_len: u64,
    /// Current version number. Zero for directories.
    pub curr_version: u64,
    pub created_at: u64,
    pub modified_at: u64,
}

impl Metadata {
    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }
}

/// One child of a directory, as returned by `readDir`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub path: String,
    pub file_name: String,
    pub metadata: Metadata,
}

/// One retained version of a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub num: u64,
    pub content_len: u64,
    pub created_at: u64,
}

/// Repository-level information, as returned by `info`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    pub volume_id: String,
    /// Engine version string.
    pub version: String,
    pub uri: String,
    pub compress: bool,
    pub version_limit: u8,
    pub dedup_chunk: bool,
    pub is_read_only: bool,
    pub created_at: u64,
}
