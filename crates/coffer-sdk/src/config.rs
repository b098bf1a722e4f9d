use std::path::{Path, PathBuf};
use std::sync::Arc;

use coffer_cache::{FileKvStore, InMemoryKvStore, KvStore};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// How replies are matched to outstanding calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correlation {
    /// One entry per call, keyed by request id.
    #[default]
    PerRequest,
    /// One slot per `(scope, message)`. Overlapping calls of the same
    /// message overwrite each other's slot.
    PerMessageType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Name of the worker thread.
    pub worker_name: String,
    pub correlation: Correlation,
    /// Directory of the file-backed cache store. `None` keeps caches in memory.
    pub cache_dir: Option<PathBuf>,
    /// Level `initEnv` applies when the call names none.
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_name: "coffer-worker".into(),
            correlation: Correlation::PerRequest,
            cache_dir: None,
            log_level: "warn".into(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(s: &str) -> BridgeResult<Self> {
        toml::from_str(s).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> BridgeResult<String> {
        toml::to_string(self).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// The key-value store backing persistent repository caches.
    pub fn kv_store(&self) -> Arc<dyn KvStore> {
        match &self.cache_dir {
            Some(dir) => Arc::new(FileKvStore::new(dir)),
            None => Arc::new(InMemoryKvStore::new()),
        }
    }
}
