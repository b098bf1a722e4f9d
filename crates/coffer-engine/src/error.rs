use coffer_types::TypeError;
use thiserror::Error;

/// Errors raised by the storage engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("wrong password")]
    WrongPassword,

    #[error("repository not found: {0}")]
    RepoNotFound(String),

    #[error("repository already exists: {0}")]
    RepoExists(String),

    #[error("repository is already opened: {0}")]
    RepoOpened(String),

    #[error("unsupported storage: {0}")]
    UnsupportedStorage(String),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("path already exists: {0}")]
    AlreadyExists(String),

    #[error("operation not allowed on root")]
    IsRoot,

    #[error("not a file: {0}")]
    NotFile(String),

    #[error("not a directory: {0}")]
    NotDir(String),

    #[error("directory is not empty: {0}")]
    NotEmpty(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("repository is read-only")]
    ReadOnly,

    #[error("version {0} does not exist")]
    NoVersion(u64),

    #[error("file is not opened for reading")]
    CannotRead,

    #[error("file is not opened for writing")]
    CannotWrite,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("repository is closed")]
    Closed,
}

impl From<TypeError> for EngineError {
    fn from(e: TypeError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
