use std::io::SeekFrom;

use coffer_protocol::{Scope, VersionReaderMsg};
use coffer_types::{encode_seek, ByteView, Handle, Value, Version};

use super::{bytes, decode, number, Object, Outcome};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};

/// Read-only view of one retained version of a file.
///
/// Stays usable after its file is closed, but not after its repository is.
#[derive(Debug)]
pub struct VersionReader {
    obj: Object,
}

impl VersionReader {
    pub(crate) fn new(bridge: Bridge, handle: Handle) -> Self {
        Self {
            obj: Object::new(bridge, handle, Scope::VersionReader),
        }
    }

    pub fn handle(&self) -> Handle {
        self.obj.handle
    }

    pub fn is_closed(&self) -> bool {
        self.obj.is_closed()
    }

    pub async fn close(&self) -> BridgeResult<()> {
        self.obj.close(VersionReaderMsg::Close).await
    }

    pub async fn version(&self) -> BridgeResult<Version> {
        let v = self.obj.call(VersionReaderMsg::Version, Value::Undefined).await?;
        decode(VersionReaderMsg::Version.into(), v)
    }

    /// See [`File::read`](super::File::read).
    pub async fn read(&self, buf: impl Into<ByteView>) -> BridgeResult<ByteView> {
        let v = self.obj.call(VersionReaderMsg::Read, Value::Buffer(buf.into())).await?;
        bytes(VersionReaderMsg::Read.into(), v)
    }

    pub async fn read_all(&self) -> BridgeResult<Vec<u8>> {
        let v = self.obj.call(VersionReaderMsg::ReadAll, Value::Undefined).await?;
        Ok(bytes(VersionReaderMsg::ReadAll.into(), v)?.into_vec())
    }

    pub async fn read_all_string(&self) -> BridgeResult<String> {
        match self.obj.call(VersionReaderMsg::ReadAllString, Value::Undefined).await? {
            Value::String(s) => Ok(s),
            other => Err(BridgeError::protocol(
                VersionReaderMsg::ReadAllString.into(),
                format!("expected a string, got {}", other.kind()),
            )),
        }
    }

    pub async fn seek(&self, pos: SeekFrom) -> BridgeResult<u64> {
        let v = self.obj.call(VersionReaderMsg::Seek, encode_seek(pos)).await?;
        number(VersionReaderMsg::Seek.into(), v)
    }

    pub async fn invoke(&self, name: &str, params: Value) -> BridgeResult<Outcome> {
        self.obj.invoke(name, params).await
    }
}
