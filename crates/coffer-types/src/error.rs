use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    #[error("invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("expected {expected}, got {actual}")]
    UnexpectedKind {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{0} does not fit in a signed 64-bit number")]
    OutOfRange(u64),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("byte range {offset}+{len} out of bounds for buffer of {capacity} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}
