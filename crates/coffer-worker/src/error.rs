use coffer_cache::CacheError;
use coffer_engine::EngineError;
use coffer_protocol::{ErrorKind, MessageType, Scope, WireError};
use coffer_types::{Handle, TypeError};
use thiserror::Error;

/// Failure while dispatching one envelope. Every variant is turned into a
/// [`WireError`] on the reply; nothing escapes the worker loop.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("no live {scope} handle {handle}")]
    HandleNotFound { scope: Scope, handle: Handle },

    #[error("engine not initialized; send initEnv first")]
    NotInitialized,

    #[error("engine failed to load: {0}")]
    Load(String),

    /// The engine panicked while handling the message.
    #[error("engine panicked during {message}: {reason}")]
    Panicked { message: MessageType, reason: String },

    #[error("content is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::Type(_) => ErrorKind::InvalidArgument,
            Self::Engine(EngineError::InvalidArgument(_)) => ErrorKind::InvalidArgument,
            Self::HandleNotFound { .. } => ErrorKind::HandleNotFound,
            Self::NotInitialized => ErrorKind::NotInitialized,
            Self::Load(_) | Self::Panicked { .. } | Self::Utf8(_) | Self::Engine(_) => {
                ErrorKind::NativeEngine
            }
            Self::Cache(_) => ErrorKind::CacheBackend,
        }
    }

    pub fn to_wire(&self) -> WireError {
        WireError::new(self.kind(), self.to_string())
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
