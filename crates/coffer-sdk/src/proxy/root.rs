use coffer_protocol::{MessageType, RootMsg, Scope};
use coffer_types::{RepoOptions, RepoUri, Value};
use coffer_worker::EngineLoader;

use super::{boolean, parse, Outcome, Repo};
use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};

/// Parse every repository URI a root message carries, so a malformed URI
/// fails before anything is sent.
fn check_uri(message: RootMsg, params: &Value) -> BridgeResult<()> {
    let raw = match message {
        RootMsg::Exists | RootMsg::Destroy => params.as_str(),
        RootMsg::OpenRepo | RootMsg::RepairSuperBlock => params.get("uri").and_then(Value::as_str),
        RootMsg::InitEnv | RootMsg::Version => None,
    };
    if let Some(raw) = raw {
        RepoUri::parse(raw)?;
    }
    Ok(())
}

/// Entry point of the SDK: engine-wide operations and repository opening.
#[derive(Clone, Debug)]
pub struct Root {
    bridge: Bridge,
}

impl Root {
    /// Start a bridge with its own worker. Must be called from within a
    /// Tokio runtime.
    pub fn start(config: BridgeConfig, loader: impl EngineLoader + 'static) -> BridgeResult<Self> {
        Ok(Self::new(Bridge::start(config, loader)?))
    }

    pub fn new(bridge: Bridge) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    async fn call(&self, message: RootMsg, params: Value) -> BridgeResult<Value> {
        check_uri(message, &params)?;
        self.bridge.call(message.into(), None, params).await
    }

    /// Load the engine and set the worker's log level. Engine calls fail
    /// with `NotInitialized` until this has succeeded once.
    pub async fn init_env(&self, log_level: Option<&str>) -> BridgeResult<()> {
        let params = match log_level {
            Some(level) => Value::object([("logLevel", Value::from(level))]),
            None => Value::Undefined,
        };
        self.call(RootMsg::InitEnv, params).await?;
        Ok(())
    }

    pub async fn version(&self) -> BridgeResult<String> {
        let v = self.call(RootMsg::Version, Value::Undefined).await?;
        match v {
            Value::String(s) => Ok(s),
            other => Err(BridgeError::protocol(
                RootMsg::Version.into(),
                format!("expected a string, got {}", other.kind()),
            )),
        }
    }

    pub async fn exists(&self, uri: &str) -> BridgeResult<bool> {
        let v = self.call(RootMsg::Exists, Value::from(uri)).await?;
        boolean(RootMsg::Exists.into(), v)
    }

    /// Remove the repository and its cache store. The repository must not
    /// be open.
    pub async fn destroy(&self, uri: &str) -> BridgeResult<()> {
        self.call(RootMsg::Destroy, Value::from(uri)).await?;
        Ok(())
    }

    pub async fn open_repo(&self, uri: &str, pwd: &str, opts: &RepoOptions) -> BridgeResult<Repo> {
        let params = Value::object([
            ("uri", Value::from(uri)),
            ("pwd", Value::from(pwd)),
            ("opts", opts.to_value()),
        ]);
        let v = self.call(RootMsg::OpenRepo, params).await?;
        Outcome::wrap(&self.bridge, RootMsg::OpenRepo.into(), v)?
            .into_repo()
            .ok_or_else(|| BridgeError::protocol(RootMsg::OpenRepo.into(), "expected a repository"))
    }

    pub async fn repair_super_block(&self, uri: &str, pwd: &str) -> BridgeResult<()> {
        let params = Value::object([("uri", Value::from(uri)), ("pwd", Value::from(pwd))]);
        self.call(RootMsg::RepairSuperBlock, params).await?;
        Ok(())
    }

    /// Call a root message by wire name.
    pub async fn invoke(&self, name: &str, params: Value) -> BridgeResult<Outcome> {
        let message = match parse(Scope::Root, name)? {
            MessageType::Root(m) => m,
            other => unreachable!("root scope parsed to {other}"),
        };
        let v = self.call(message, params).await?;
        Outcome::wrap(&self.bridge, message.into(), v)
    }

    /// Shut the worker down. Calls still pending fail with `Terminated`.
    /// Returns the number of calls abandoned.
    pub async fn exit(&self) -> usize {
        self.bridge.exit().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use coffer_cache::{FileKvStore, KvStore};
    use coffer_engine::InMemoryEngine;
    use coffer_protocol::ErrorKind;
    use coffer_worker::mem_loader;

    use super::*;
    use crate::test_support::{root, URI};

    #[tokio::test]
    async fn version_needs_init() {
        let root = Root::start(BridgeConfig::default(), mem_loader(InMemoryEngine::new())).unwrap();
        let err = root.version().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotInitialized));
        root.init_env(Some("debug")).await.unwrap();
        assert!(root.version().await.unwrap().starts_with("coffer-mem"));
        root.exit().await;
    }

    #[tokio::test]
    async fn malformed_uris_fail_before_send() {
        let root = root().await;
        for uri in ["mem//k@r", "mem://k", "mem://@r", "mem://k@r/x", "mem://k@r?cache_type=disk", "mem://k@r?cache_size=big"] {
            let err = root.exists(uri).await.unwrap_err();
            assert!(matches!(err, BridgeError::InvalidArgument(_)), "{uri}: {err}");
        }
        let err = root
            .invoke("openRepo", Value::object([("uri", Value::from("nope")), ("pwd", Value::from("p"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
        assert_eq!(root.bridge().pending_count(), 0);
        root.exit().await;
    }

    #[tokio::test]
    async fn open_create_and_exists() {
        let root = root().await;
        assert!(!root.exists(URI).await.unwrap());
        let err = root.open_repo(URI, "pwd", &RepoOptions::new()).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NativeEngine));

        let repo = root.open_repo(URI, "pwd", &RepoOptions::new().create(true)).await.unwrap();
        assert!(root.exists(URI).await.unwrap());
        repo.close().await.unwrap();

        let err = root.open_repo(URI, "wrong", &RepoOptions::new()).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NativeEngine));
        root.exit().await;
    }

    #[tokio::test]
    async fn repair_needs_closed_repo() {
        let root = root().await;
        let repo = root.open_repo(URI, "pwd", &RepoOptions::new().create(true)).await.unwrap();
        assert!(root.repair_super_block(URI, "pwd").await.is_err());
        repo.close().await.unwrap();
        root.repair_super_block(URI, "pwd").await.unwrap();
        root.exit().await;
    }

    #[tokio::test]
    async fn destroy_removes_repo_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            ..BridgeConfig::default()
        };
        let root = Root::start(config, mem_loader(InMemoryEngine::new())).unwrap();
        root.init_env(None).await.unwrap();

        let repo = root.open_repo(URI, "pwd", &RepoOptions::new().create(true)).await.unwrap();
        let file = repo.create_file("/f").await.unwrap();
        file.write_once("cached").await.unwrap();
        repo.close().await.unwrap();

        let store: Arc<dyn KvStore> = Arc::new(FileKvStore::new(dir.path()));
        assert!(!store.load("repo").await.unwrap().is_empty());

        root.destroy(URI).await.unwrap();
        assert!(!root.exists(URI).await.unwrap());
        assert!(store.load("repo").await.unwrap().is_empty());
        root.exit().await;
    }

    #[tokio::test]
    async fn invoke_wraps_open_repo() {
        let root = root().await;
        let params = Value::object([
            ("uri", Value::from(URI)),
            ("pwd", Value::from("pwd")),
            ("opts", RepoOptions::new().create(true).to_value()),
        ]);
        let repo = root.invoke("openRepo", params).await.unwrap().into_repo().unwrap();
        repo.close().await.unwrap();

        let err = root.invoke("close", Value::Undefined).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
        root.exit().await;
    }
}
