//! Caller-side stand-ins for the objects living in the worker.
//!
//! Each proxy wraps the bridge and, except for [`Root`], the handle of the
//! object it stands for. Typed methods cover every message of the proxy's
//! scope; `invoke` reaches the same messages by wire name.

mod file;
mod repo;
mod root;
mod version_reader;

use std::sync::atomic::{AtomicBool, Ordering};

use coffer_protocol::{FileMsg, MessageType, ProtocolError, RepoMsg, RootMsg, Scope, VersionReaderMsg};
use coffer_types::{ByteView, Handle, Value};
use serde::de::DeserializeOwned;

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};

pub use file::File;
pub use repo::Repo;
pub use root::Root;
pub use version_reader::VersionReader;

/// Post-processed result of a dynamically invoked message.
#[derive(Debug)]
pub enum Outcome {
    Value(Value),
    /// Bytes read, covering exactly what the worker filled.
    Bytes(ByteView),
    Repo(Repo),
    File(File),
    VersionReader(VersionReader),
}

impl Outcome {
    /// Shape a raw reply according to the message that produced it.
    pub(crate) fn wrap(bridge: &Bridge, message: MessageType, value: Value) -> BridgeResult<Self> {
        let handle = || {
            value
                .as_handle()
                .ok_or_else(|| BridgeError::protocol(message, format!("expected a handle, got {}", value.kind())))
        };
        Ok(match message {
            MessageType::Root(RootMsg::OpenRepo) => Self::Repo(Repo::new(bridge.clone(), handle()?)),
            MessageType::Repo(RepoMsg::OpenFile | RepoMsg::CreateFile) => {
                Self::File(File::new(bridge.clone(), handle()?))
            }
            MessageType::File(FileMsg::VersionReader) => {
                Self::VersionReader(VersionReader::new(bridge.clone(), handle()?))
            }
            MessageType::File(FileMsg::Read | FileMsg::ReadAll)
            | MessageType::VersionReader(VersionReaderMsg::Read | VersionReaderMsg::ReadAll) => {
                Self::Bytes(bytes(message, value)?)
            }
            _ => Self::Value(value),
        })
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Bytes(b) => Some(Value::Buffer(b)),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<ByteView> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_repo(self) -> Option<Repo> {
        match self {
            Self::Repo(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_file(self) -> Option<File> {
        match self {
            Self::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn into_version_reader(self) -> Option<VersionReader> {
        match self {
            Self::VersionReader(r) => Some(r),
            _ => None,
        }
    }
}

fn bytes(message: MessageType, value: Value) -> BridgeResult<ByteView> {
    let kind = value.kind();
    value
        .into_buffer()
        .ok_or_else(|| BridgeError::protocol(message, format!("expected a buffer, got {kind}")))
}

fn decode<T: DeserializeOwned>(message: MessageType, value: Value) -> BridgeResult<T> {
    value
        .deserialize_into()
        .map_err(|e| BridgeError::protocol(message, e.to_string()))
}

fn number(message: MessageType, value: Value) -> BridgeResult<u64> {
    value
        .require_u64()
        .map_err(|e| BridgeError::protocol(message, e.to_string()))
}

fn boolean(message: MessageType, value: Value) -> BridgeResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| BridgeError::protocol(message, format!("expected a boolean, got {}", value.kind())))
}

fn parse(scope: Scope, name: &str) -> BridgeResult<MessageType> {
    MessageType::parse(scope, name).ok_or_else(|| {
        ProtocolError::UnknownMessage {
            scope,
            name: name.to_string(),
        }
        .into()
    })
}

/// State shared by the handle-bearing proxies.
#[derive(Debug)]
struct Object {
    bridge: Bridge,
    handle: Handle,
    scope: Scope,
    closed: AtomicBool,
}

impl Object {
    fn new(bridge: Bridge, handle: Handle, scope: Scope) -> Self {
        Self {
            bridge,
            handle,
            scope,
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn call(&self, message: impl Into<MessageType>, params: Value) -> BridgeResult<Value> {
        if self.is_closed() {
            return Err(BridgeError::AlreadyClosed(format!("{} {}", self.scope, self.handle)));
        }
        self.bridge.call(message.into(), Some(self.handle), params).await
    }

    /// Close the remote object. A second close succeeds without a round trip.
    async fn close(&self, message: impl Into<MessageType>) -> BridgeResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.bridge.call(message.into(), Some(self.handle), Value::Undefined).await?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn invoke(&self, name: &str, params: Value) -> BridgeResult<Outcome> {
        let message = parse(self.scope, name)?;
        if message.is_close() {
            self.close(message).await?;
            return Ok(Outcome::Value(Value::Undefined));
        }
        let value = self.call(message, params).await?;
        Outcome::wrap(&self.bridge, message, value)
    }
}
