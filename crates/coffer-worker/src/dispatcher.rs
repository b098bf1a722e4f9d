use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use coffer_cache::{CacheBackend, KvStore};
use coffer_engine::{Engine, EngineResult, InMemoryEngine};
use coffer_protocol::{Envelope, FileMsg, MessageType, RepoMsg, RootMsg, VersionReaderMsg};
use coffer_types::{
    decode_seek, ByteView, CacheType, FileOptions, Handle, RepoOptions, RepoUri, TypeError, Value,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::handles::{HandleTable, Orphans, RepoEntry};
use crate::logging;

/// Produces the storage engine when the worker receives `initEnv`.
pub trait EngineLoader: Send {
    fn load(&mut self) -> EngineResult<Box<dyn Engine>>;
}

impl<F> EngineLoader for F
where
    F: FnMut() -> EngineResult<Box<dyn Engine>> + Send,
{
    fn load(&mut self) -> EngineResult<Box<dyn Engine>> {
        self()
    }
}

/// Loader handing out clones of one in-memory engine.
pub fn mem_loader(engine: InMemoryEngine) -> impl EngineLoader {
    move || -> EngineResult<Box<dyn Engine>> { Ok(Box::new(engine.clone())) }
}

fn invalid(message: impl Into<String>) -> DispatchError {
    DispatchError::InvalidArgument(message.into())
}

fn target(message: MessageType, object: Option<Handle>) -> DispatchResult<Handle> {
    object.ok_or_else(|| invalid(format!("{message} requires a target handle")))
}

fn to_value<T: Serialize>(value: &T) -> DispatchResult<Value> {
    Ok(Value::from_serialize(value)?)
}

fn from_to(params: &Value) -> DispatchResult<(&str, &str)> {
    Ok((params.field_str("from")?, params.field_str("to")?))
}

/// Bytes of a write payload. Strings are accepted as UTF-8.
fn payload(params: Value) -> DispatchResult<ByteView> {
    match params {
        Value::Buffer(view) => Ok(view),
        Value::String(s) => Ok(ByteView::new(s.into_bytes())),
        other => Err(TypeError::UnexpectedKind {
            expected: "buffer",
            actual: other.kind().as_str(),
        }
        .into()),
    }
}

fn buffer(params: Value) -> DispatchResult<ByteView> {
    let kind = params.kind();
    params.into_buffer().ok_or_else(|| {
        TypeError::UnexpectedKind {
            expected: "buffer",
            actual: kind.as_str(),
        }
        .into()
    })
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run engine code, turning a panic into an error for `message` so the
/// worker keeps serving.
fn guard<T>(message: MessageType, call: impl FnOnce() -> DispatchResult<T>) -> DispatchResult<T> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        let reason = panic_reason(payload.as_ref());
        error!(%message, %reason, "engine panicked");
        Err(DispatchError::Panicked { message, reason })
    })
}

fn close_orphans(orphans: Orphans) {
    for (handle, mut reader) in orphans.readers {
        if let Err(e) = reader.native.close() {
            debug!(%handle, error = %e, "version reader close failed");
        }
    }
    for (handle, mut file) in orphans.files {
        if let Err(e) = file.native.close() {
            debug!(%handle, error = %e, "file close failed");
        }
    }
}

/// Worker-side message router.
///
/// Owns the engine, the handle table and every repository's cache backend.
/// Envelopes are handled one at a time; every failure becomes the reply's
/// `error`.
pub struct Dispatcher {
    loader: Box<dyn EngineLoader>,
    engine: Option<Box<dyn Engine>>,
    handles: HandleTable,
    store: Arc<dyn KvStore>,
    log_level: String,
}

impl Dispatcher {
    pub fn new(loader: impl EngineLoader + 'static, store: Arc<dyn KvStore>) -> Self {
        Self {
            loader: Box::new(loader),
            engine: None,
            handles: HandleTable::new(),
            store,
            log_level: "warn".to_string(),
        }
    }

    /// Level applied by `initEnv` when the call names none.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    fn engine(&self) -> DispatchResult<&dyn Engine> {
        self.engine.as_deref().ok_or(DispatchError::NotInitialized)
    }

    /// Handle one request and turn it into its reply.
    pub async fn dispatch(&mut self, mut env: Envelope) -> Envelope {
        env.reset();
        let params = std::mem::take(&mut env.params);
        let message = env.message;
        let object = env.object;
        debug!(id = %env.id, %message, ?object, "dispatch");

        let outcome = match message {
            MessageType::Root(m) => self.root(m, params).await,
            MessageType::Repo(RepoMsg::Close) => match target(message, object) {
                Ok(h) => self.close_repo(h).await,
                Err(e) => Err(e),
            },
            MessageType::Repo(m) => guard(message, || {
                target(message, object).and_then(|h| self.repo(m, h, params))
            }),
            MessageType::File(m) => guard(message, || {
                target(message, object).and_then(|h| self.file(m, h, params))
            }),
            MessageType::VersionReader(m) => guard(message, || {
                target(message, object).and_then(|h| self.version_reader(m, h, params))
            }),
        };

        match outcome {
            Ok(result) => env.reply_ok(result),
            Err(e) => {
                debug!(id = %env.id, %message, error = %e, "dispatch failed");
                env.reply_err(e.to_wire())
            }
        }
    }

    /// Drop every open object. Caches are discarded without flushing.
    pub fn teardown(&mut self) {
        for (handle, mut entry, orphans) in self.handles.drain() {
            let closed = guard(RepoMsg::Close.into(), || {
                close_orphans(orphans);
                Ok(entry.native.close()?)
            });
            if let Err(e) = closed {
                debug!(%handle, error = %e, "repository close failed during teardown");
            }
            entry.cache.immediate_close();
        }
    }

    // ---- Root ----

    async fn root(&mut self, msg: RootMsg, params: Value) -> DispatchResult<Value> {
        match msg {
            RootMsg::InitEnv => {
                let level = params
                    .get("logLevel")
                    .and_then(Value::as_str)
                    .unwrap_or(self.log_level.as_str());
                logging::init(level);
                if self.engine.is_none() {
                    let loader = &mut self.loader;
                    let engine = guard(msg.into(), || {
                        loader.load().map_err(|e| DispatchError::Load(e.to_string()))
                    })?;
                    info!(version = %engine.version(), "engine loaded");
                    self.engine = Some(engine);
                }
                Ok(Value::Undefined)
            }
            RootMsg::Version => guard(msg.into(), || Ok(Value::from(self.engine()?.version()))),
            RootMsg::Exists => {
                let uri = RepoUri::parse(params.require_str()?)?;
                guard(msg.into(), || Ok(Value::from(self.engine()?.exists(&uri)?)))
            }
            RootMsg::Destroy => {
                let uri = RepoUri::parse(params.require_str()?)?;
                guard(msg.into(), || Ok(self.engine()?.destroy(&uri)?))?;
                let existed = CacheBackend::persistent(Arc::clone(&self.store))
                    .destroy(uri.store_id())
                    .await?;
                info!(repo = uri.repo_id(), cache_existed = existed, "repository destroyed");
                Ok(Value::Undefined)
            }
            RootMsg::OpenRepo => self.open_repo(&params).await,
            RootMsg::RepairSuperBlock => {
                let uri = RepoUri::parse(params.field_str("uri")?)?;
                let pwd = params.field_str("pwd")?;
                guard(msg.into(), || Ok(self.engine()?.repair_super_block(&uri, pwd)?))?;
                Ok(Value::Undefined)
            }
        }
    }

    async fn open_repo(&mut self, params: &Value) -> DispatchResult<Value> {
        let uri = RepoUri::parse(params.field_str("uri")?)?;
        let pwd = params.field_str("pwd")?;
        let opts = match params.get("opts") {
            Some(bag) => RepoOptions::from_value(bag)?,
            None => RepoOptions::default(),
        };
        self.engine()?;

        let cache = match uri.cache_type() {
            CacheType::Mem => CacheBackend::ephemeral(),
            CacheType::Persistent => CacheBackend::persistent(Arc::clone(&self.store)),
        };
        cache.open(uri.store_id()).await?;

        let opened = guard(RootMsg::OpenRepo.into(), || {
            Ok(self.engine()?.open_repo(&uri, pwd, &opts, Arc::new(cache.view()))?)
        });
        let native = match opened {
            Ok(native) => native,
            Err(e) => {
                cache.immediate_close();
                return Err(e);
            }
        };
        let repo = uri.repo_id().to_string();
        let handle = self.handles.insert_repo(RepoEntry { uri, native, cache });
        info!(%repo, %handle, "repository opened");
        Ok(Value::from(handle))
    }

    // ---- Repo ----

    fn repo(&mut self, msg: RepoMsg, h: Handle, params: Value) -> DispatchResult<Value> {
        let repo = self.handles.repo(h)?;
        let native = &mut repo.native;
        let result = match msg {
            RepoMsg::Close => unreachable!("routed to close_repo"),
            RepoMsg::Info => to_value(&native.info()?)?,
            RepoMsg::ResetPassword => {
                native.reset_password(params.field_str("oldPwd")?, params.field_str("newPwd")?)?;
                Value::Undefined
            }
            RepoMsg::PathExists => Value::from(native.path_exists(params.require_str()?)?),
            RepoMsg::IsFile => Value::from(native.is_file(params.require_str()?)?),
            RepoMsg::IsDir => Value::from(native.is_dir(params.require_str()?)?),
            RepoMsg::CreateFile => {
                let file = native.create_file(params.require_str()?)?;
                Value::from(self.handles.insert_file(h, file))
            }
            RepoMsg::OpenFile => {
                let (path, opts) = match &params {
                    Value::String(path) => (path.as_str(), FileOptions::default()),
                    _ => {
                        let opts = match params.get("opts") {
                            Some(bag) => FileOptions::from_value(bag)?,
                            None => FileOptions::default(),
                        };
                        (params.field_str("path")?, opts)
                    }
                };
                let file = native.open_file(path, &opts)?;
                Value::from(self.handles.insert_file(h, file))
            }
            RepoMsg::CreateDir => {
                native.create_dir(params.require_str()?)?;
                Value::Undefined
            }
            RepoMsg::CreateDirAll => {
                native.create_dir_all(params.require_str()?)?;
                Value::Undefined
            }
            RepoMsg::ReadDir => to_value(&native.read_dir(params.require_str()?)?)?,
            RepoMsg::Metadata => to_value(&native.metadata(params.require_str()?)?)?,
            RepoMsg::History => to_value(&native.history(params.require_str()?)?)?,
            RepoMsg::Copy => {
                let (from, to) = from_to(&params)?;
                native.copy(from, to)?;
                Value::Undefined
            }
            RepoMsg::CopyDirAll => {
                let (from, to) = from_to(&params)?;
                native.copy_dir_all(from, to)?;
                Value::Undefined
            }
            RepoMsg::RemoveFile => {
                native.remove_file(params.require_str()?)?;
                Value::Undefined
            }
            RepoMsg::RemoveDir => {
                native.remove_dir(params.require_str()?)?;
                Value::Undefined
            }
            RepoMsg::RemoveDirAll => {
                native.remove_dir_all(params.require_str()?)?;
                Value::Undefined
            }
            RepoMsg::Rename => {
                let (from, to) = from_to(&params)?;
                native.rename(from, to)?;
                Value::Undefined
            }
        };
        Ok(result)
    }

    async fn close_repo(&mut self, h: Handle) -> DispatchResult<Value> {
        let Some((mut entry, orphans)) = self.handles.remove_repo(h) else {
            debug!(handle = %h, "close of unknown repository handle ignored");
            return Ok(Value::Undefined);
        };
        if !orphans.is_empty() {
            warn!(
                repo = entry.uri.repo_id(),
                files = orphans.files.len(),
                readers = orphans.readers.len(),
                "repository closed with open handles; invalidating them"
            );
        }
        let closed = guard(RepoMsg::Close.into(), || {
            close_orphans(orphans);
            Ok(entry.native.close()?)
        });
        let flushed = entry.cache.close().await;
        closed?;
        let flushed = flushed?;
        info!(repo = entry.uri.repo_id(), handle = %h, flushed, "repository closed");
        Ok(Value::Undefined)
    }

    // ---- File ----

    fn file(&mut self, msg: FileMsg, h: Handle, params: Value) -> DispatchResult<Value> {
        if msg == FileMsg::Close {
            if let Some(mut entry) = self.handles.remove_file(h) {
                entry.native.close()?;
                debug!(handle = %h, "file closed");
            }
            return Ok(Value::Undefined);
        }
        let entry = self.handles.file(h)?;
        let repo = entry.repo;
        let file = &mut entry.native;
        let result = match msg {
            FileMsg::Close => unreachable!("handled above"),
            FileMsg::Read => {
                let mut view = buffer(params)?;
                let n = file.read(view.as_mut_slice())?;
                Value::Buffer(view.narrow(n))
            }
            FileMsg::ReadAll => Value::from(file.read_all()?),
            FileMsg::ReadAllString => Value::from(String::from_utf8(file.read_all()?)?),
            FileMsg::Write => Value::try_from(file.write(&payload(params)?)?)?,
            FileMsg::Finish => {
                file.finish()?;
                Value::Undefined
            }
            FileMsg::WriteOnce => {
                file.write_once(&payload(params)?)?;
                Value::Undefined
            }
            FileMsg::Seek => Value::try_from(file.seek(decode_seek(&params)?)?)?,
            FileMsg::SetLen => {
                file.set_len(params.require_u64()?)?;
                Value::Undefined
            }
            FileMsg::CurrVersion => Value::try_from(file.curr_version()?)?,
            FileMsg::Metadata => to_value(&file.metadata()?)?,
            FileMsg::History => to_value(&file.history()?)?,
            FileMsg::VersionReader => {
                let reader = file.version_reader(params.require_u64()?)?;
                Value::from(self.handles.insert_reader(repo, h, reader))
            }
        };
        Ok(result)
    }

    // ---- Version reader ----

    fn version_reader(&mut self, msg: VersionReaderMsg, h: Handle, params: Value) -> DispatchResult<Value> {
        if msg == VersionReaderMsg::Close {
            if let Some(mut entry) = self.handles.remove_reader(h) {
                entry.native.close()?;
                debug!(handle = %h, file = %entry.file, "version reader closed");
            }
            return Ok(Value::Undefined);
        }
        let reader = &mut self.handles.reader(h)?.native;
        let result = match msg {
            VersionReaderMsg::Close => unreachable!("handled above"),
            VersionReaderMsg::Version => to_value(&reader.version()?)?,
            VersionReaderMsg::Read => {
                let mut view = buffer(params)?;
                let n = reader.read(view.as_mut_slice())?;
                Value::Buffer(view.narrow(n))
            }
            VersionReaderMsg::ReadAll => Value::from(reader.read_all()?),
            VersionReaderMsg::ReadAllString => Value::from(String::from_utf8(reader.read_all()?)?),
            VersionReaderMsg::Seek => Value::try_from(reader.seek(decode_seek(&params)?)?)?,
        };
        Ok(result)
    }
}
