use std::fmt;

use coffer_types::{Handle, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{MessageType, Scope};

/// Per-call request identifier, echoed verbatim on the reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Error category carried across the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    HandleNotFound,
    AlreadyClosed,
    NativeEngine,
    CacheBackend,
    NotInitialized,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::HandleNotFound => "HandleNotFound",
            Self::AlreadyClosed => "AlreadyClosed",
            Self::NativeEngine => "NativeEngine",
            Self::CacheBackend => "CacheBackend",
            Self::NotInitialized => "NotInitialized",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker-side failure serialized into a reply.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A request or reply travelling between the calling context and the worker.
///
/// On a request neither `result` nor `error` is set. On a reply exactly one
/// of them is.
#[derive(Debug)]
pub struct Envelope {
    pub id: RequestId,
    pub message: MessageType,
    /// Target handle; `None` for the root scope.
    pub object: Option<Handle>,
    pub params: Value,
    pub result: Option<Value>,
    pub error: Option<WireError>,
}

impl Envelope {
    pub fn request(id: RequestId, message: MessageType, object: Option<Handle>, params: Value) -> Self {
        Self {
            id,
            message,
            object,
            params,
            result: None,
            error: None,
        }
    }

    pub fn scope(&self) -> Scope {
        self.message.scope()
    }

    /// Clear any reply state left on the envelope.
    pub fn reset(&mut self) {
        self.result = None;
        self.error = None;
    }

    pub fn is_reply(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Turn the request into a successful reply. The params are dropped.
    pub fn reply_ok(mut self, result: Value) -> Self {
        self.params = Value::Undefined;
        self.result = Some(result);
        self.error = None;
        self
    }

    /// Turn the request into a failed reply. The params are dropped.
    pub fn reply_err(mut self, error: WireError) -> Self {
        self.params = Value::Undefined;
        self.result = None;
        self.error = Some(error);
        self
    }

    pub fn into_outcome(self) -> Result<Value, WireError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or_default()),
        }
    }
}
