use coffer_protocol::{ErrorKind, MessageType, ProtocolError, WireError};
use coffer_types::TypeError;
use thiserror::Error;

/// Errors surfaced to callers of the SDK.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Rejected before sending, or reported by the worker while extracting
    /// arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("handle not found: {0}")]
    HandleNotFound(String),

    #[error("{0} is already closed")]
    AlreadyClosed(String),

    #[error("native engine error: {0}")]
    NativeEngine(String),

    #[error("cache backend error: {0}")]
    CacheBackend(String),

    #[error("engine not initialized: {0}")]
    NotInitialized(String),

    /// The bridge exited or the worker went away before the reply arrived.
    #[error("bridge terminated")]
    Terminated,

    /// A later call of the same message took this call's correlation slot.
    #[error("call superseded by a later {0} call")]
    Superseded(MessageType),

    #[error("unexpected reply to {message}: {reason}")]
    Protocol { message: MessageType, reason: String },

    #[error("failed to start worker: {0}")]
    Spawn(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// The wire taxonomy entry this error corresponds to, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        Some(match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::HandleNotFound(_) => ErrorKind::HandleNotFound,
            Self::AlreadyClosed(_) => ErrorKind::AlreadyClosed,
            Self::NativeEngine(_) => ErrorKind::NativeEngine,
            Self::CacheBackend(_) => ErrorKind::CacheBackend,
            Self::NotInitialized(_) => ErrorKind::NotInitialized,
            _ => return None,
        })
    }

    pub(crate) fn protocol(message: MessageType, reason: impl Into<String>) -> Self {
        Self::Protocol {
            message,
            reason: reason.into(),
        }
    }
}

impl From<WireError> for BridgeError {
    fn from(e: WireError) -> Self {
        match e.kind {
            ErrorKind::InvalidArgument => Self::InvalidArgument(e.message),
            ErrorKind::HandleNotFound => Self::HandleNotFound(e.message),
            ErrorKind::AlreadyClosed => Self::AlreadyClosed(e.message),
            ErrorKind::NativeEngine => Self::NativeEngine(e.message),
            ErrorKind::CacheBackend => Self::CacheBackend(e.message),
            ErrorKind::NotInitialized => Self::NotInitialized(e.message),
        }
    }
}

impl From<ProtocolError> for BridgeError {
    fn from(e: ProtocolError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

impl From<TypeError> for BridgeError {
    fn from(e: TypeError) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
