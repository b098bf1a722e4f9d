use thiserror::Error;

use crate::message::{MessageType, Scope};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid argument for {message}: {reason}")]
    InvalidArgument { message: MessageType, reason: String },

    #[error("unknown message '{name}' in scope {scope}")]
    UnknownMessage { scope: Scope, name: String },

    #[error("message {0} requires a target object")]
    MissingObject(MessageType),
}

impl ProtocolError {
    pub(crate) fn invalid(message: MessageType, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::debug!(%message, %reason, "argument rejected");
        Self::InvalidArgument {
            message,
            reason,
        }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
