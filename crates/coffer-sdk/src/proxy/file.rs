use std::io::SeekFrom;

use coffer_protocol::{FileMsg, Scope};
use coffer_types::{encode_seek, ByteView, Handle, Metadata, Value, Version};

use super::{bytes, decode, number, Object, Outcome, VersionReader};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};

/// An open file. Reads and writes share one cursor in the worker.
#[derive(Debug)]
pub struct File {
    obj: Object,
}

impl File {
    pub(crate) fn new(bridge: Bridge, handle: Handle) -> Self {
        Self {
            obj: Object::new(bridge, handle, Scope::File),
        }
    }

    pub fn handle(&self) -> Handle {
        self.obj.handle
    }

    pub fn is_closed(&self) -> bool {
        self.obj.is_closed()
    }

    async fn call(&self, msg: FileMsg, params: Value) -> BridgeResult<Value> {
        self.obj.call(msg, params).await
    }

    /// Close the file, discarding writes not yet finished.
    pub async fn close(&self) -> BridgeResult<()> {
        self.obj.close(FileMsg::Close).await
    }

    /// Read into `buf`'s window from the cursor.
    ///
    /// The buffer is moved to the worker and handed back narrowed to the
    /// bytes actually read, which may be fewer than requested and is zero
    /// once the cursor is at the end.
    pub async fn read(&self, buf: impl Into<ByteView>) -> BridgeResult<ByteView> {
        let v = self.call(FileMsg::Read, Value::Buffer(buf.into())).await?;
        bytes(FileMsg::Read.into(), v)
    }

    /// Read from the cursor to the end.
    pub async fn read_all(&self) -> BridgeResult<Vec<u8>> {
        let v = self.call(FileMsg::ReadAll, Value::Undefined).await?;
        Ok(bytes(FileMsg::ReadAll.into(), v)?.into_vec())
    }

    pub async fn read_all_string(&self) -> BridgeResult<String> {
        match self.call(FileMsg::ReadAllString, Value::Undefined).await? {
            Value::String(s) => Ok(s),
            other => Err(BridgeError::protocol(
                FileMsg::ReadAllString.into(),
                format!("expected a string, got {}", other.kind()),
            )),
        }
    }

    /// Stage bytes (or a string, as UTF-8) at the cursor. Returns the
    /// number of bytes written.
    pub async fn write(&self, data: impl Into<Value>) -> BridgeResult<usize> {
        let v = self.call(FileMsg::Write, data.into()).await?;
        Ok(number(FileMsg::Write.into(), v)? as usize)
    }

    /// Commit staged writes as a new version.
    pub async fn finish(&self) -> BridgeResult<()> {
        self.call(FileMsg::Finish, Value::Undefined).await.map(drop)
    }

    /// Write and commit in one step.
    pub async fn write_once(&self, data: impl Into<Value>) -> BridgeResult<()> {
        self.call(FileMsg::WriteOnce, data.into()).await.map(drop)
    }

    pub async fn seek(&self, pos: SeekFrom) -> BridgeResult<u64> {
        let v = self.call(FileMsg::Seek, encode_seek(pos)).await?;
        number(FileMsg::Seek.into(), v)
    }

    /// Truncate or zero-extend the content, committing a new version.
    pub async fn set_len(&self, len: u64) -> BridgeResult<()> {
        self.call(FileMsg::SetLen, Value::try_from(len)?).await.map(drop)
    }

    pub async fn curr_version(&self) -> BridgeResult<u64> {
        let v = self.call(FileMsg::CurrVersion, Value::Undefined).await?;
        number(FileMsg::CurrVersion.into(), v)
    }

    pub async fn metadata(&self) -> BridgeResult<Metadata> {
        let v = self.call(FileMsg::Metadata, Value::Undefined).await?;
        decode(FileMsg::Metadata.into(), v)
    }

    pub async fn history(&self) -> BridgeResult<Vec<Version>> {
        let v = self.call(FileMsg::History, Value::Undefined).await?;
        decode(FileMsg::History.into(), v)
    }

    /// Open a reader over one retained version.
    pub async fn version_reader(&self, num: u64) -> BridgeResult<VersionReader> {
        let v = self.call(FileMsg::VersionReader, Value::try_from(num)?).await?;
        Outcome::wrap(&self.obj.bridge, FileMsg::VersionReader.into(), v)?
            .into_version_reader()
            .ok_or_else(|| BridgeError::protocol(FileMsg::VersionReader.into(), "expected a version reader"))
    }

    /// Call a file message by wire name.
    pub async fn invoke(&self, name: &str, params: Value) -> BridgeResult<Outcome> {
        self.obj.invoke(name, params).await
    }
}
