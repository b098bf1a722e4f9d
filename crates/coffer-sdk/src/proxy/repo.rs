use coffer_protocol::{RepoMsg, Scope};
use coffer_types::{DirEntry, FileOptions, Handle, Metadata, RepoInfo, Value, Version};

use super::{boolean, decode, File, Object, Outcome};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};

fn from_to(from: &str, to: &str) -> Value {
    Value::object([("from", Value::from(from)), ("to", Value::from(to))])
}

/// An open repository.
#[derive(Debug)]
pub struct Repo {
    obj: Object,
}

impl Repo {
    pub(crate) fn new(bridge: Bridge, handle: Handle) -> Self {
        Self {
            obj: Object::new(bridge, handle, Scope::Repo),
        }
    }

    pub fn handle(&self) -> Handle {
        self.obj.handle
    }

    pub fn is_closed(&self) -> bool {
        self.obj.is_closed()
    }

    async fn call(&self, msg: RepoMsg, params: Value) -> BridgeResult<Value> {
        self.obj.call(msg, params).await
    }

    async fn unit(&self, msg: RepoMsg, params: Value) -> BridgeResult<()> {
        self.call(msg, params).await.map(drop)
    }

    async fn flag(&self, msg: RepoMsg, path: &str) -> BridgeResult<bool> {
        let v = self.call(msg, Value::from(path)).await?;
        boolean(msg.into(), v)
    }

    async fn file(&self, msg: RepoMsg, params: Value) -> BridgeResult<File> {
        let v = self.call(msg, params).await?;
        Outcome::wrap(&self.obj.bridge, msg.into(), v)?
            .into_file()
            .ok_or_else(|| BridgeError::protocol(msg.into(), "expected a file"))
    }

    /// Close the repository. Files and version readers opened from it stop
    /// working. Closing twice is a no-op.
    pub async fn close(&self) -> BridgeResult<()> {
        self.obj.close(RepoMsg::Close).await
    }

    pub async fn info(&self) -> BridgeResult<RepoInfo> {
        let v = self.call(RepoMsg::Info, Value::Undefined).await?;
        decode(RepoMsg::Info.into(), v)
    }

    pub async fn reset_password(&self, old_pwd: &str, new_pwd: &str) -> BridgeResult<()> {
        let params = Value::object([("oldPwd", Value::from(old_pwd)), ("newPwd", Value::from(new_pwd))]);
        self.unit(RepoMsg::ResetPassword, params).await
    }

    pub async fn path_exists(&self, path: &str) -> BridgeResult<bool> {
        self.flag(RepoMsg::PathExists, path).await
    }

    pub async fn is_file(&self, path: &str) -> BridgeResult<bool> {
        self.flag(RepoMsg::IsFile, path).await
    }

    pub async fn is_dir(&self, path: &str) -> BridgeResult<bool> {
        self.flag(RepoMsg::IsDir, path).await
    }

    /// Create a file opened for writing, truncating any existing content.
    pub async fn create_file(&self, path: &str) -> BridgeResult<File> {
        self.file(RepoMsg::CreateFile, Value::from(path)).await
    }

    /// Open an existing file for reading.
    pub async fn open_file(&self, path: &str) -> BridgeResult<File> {
        self.file(RepoMsg::OpenFile, Value::from(path)).await
    }

    pub async fn open_file_with(&self, path: &str, opts: &FileOptions) -> BridgeResult<File> {
        let params = Value::object([("path", Value::from(path)), ("opts", opts.to_value())]);
        self.file(RepoMsg::OpenFile, params).await
    }

    pub async fn create_dir(&self, path: &str) -> BridgeResult<()> {
        self.unit(RepoMsg::CreateDir, Value::from(path)).await
    }

    pub async fn create_dir_all(&self, path: &str) -> BridgeResult<()> {
        self.unit(RepoMsg::CreateDirAll, Value::from(path)).await
    }

    pub async fn read_dir(&self, path: &str) -> BridgeResult<Vec<DirEntry>> {
        let v = self.call(RepoMsg::ReadDir, Value::from(path)).await?;
        decode(RepoMsg::ReadDir.into(), v)
    }

    pub async fn metadata(&self, path: &str) -> BridgeResult<Metadata> {
        let v = self.call(RepoMsg::Metadata, Value::from(path)).await?;
        decode(RepoMsg::Metadata.into(), v)
    }

    pub async fn history(&self, path: &str) -> BridgeResult<Vec<Version>> {
        let v = self.call(RepoMsg::History, Value::from(path)).await?;
        decode(RepoMsg::History.into(), v)
    }

    pub async fn copy(&self, from: &str, to: &str) -> BridgeResult<()> {
        self.unit(RepoMsg::Copy, from_to(from, to)).await
    }

    pub async fn copy_dir_all(&self, from: &str, to: &str) -> BridgeResult<()> {
        self.unit(RepoMsg::CopyDirAll, from_to(from, to)).await
    }

    pub async fn remove_file(&self, path: &str) -> BridgeResult<()> {
        self.unit(RepoMsg::RemoveFile, Value::from(path)).await
    }

    pub async fn remove_dir(&self, path: &str) -> BridgeResult<()> {
        self.unit(RepoMsg::RemoveDir, Value::from(path)).await
    }

    pub async fn remove_dir_all(&self, path: &str) -> BridgeResult<()> {
        self.unit(RepoMsg::RemoveDirAll, Value::from(path)).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> BridgeResult<()> {
        self.unit(RepoMsg::Rename, from_to(from, to)).await
    }

    /// Call a repository message by wire name.
    pub async fn invoke(&self, name: &str, params: Value) -> BridgeResult<Outcome> {
        self.obj.invoke(name, params).await
    }
}
