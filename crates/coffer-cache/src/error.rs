/// Errors from cache backend and key-value store operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The persistent store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A transaction was rejected or aborted; nothing was applied.
    #[error("transaction failed on store '{store}': {reason}")]
    Transaction { store: String, reason: String },

    /// Store identifiers must be non-empty and limited to `[A-Za-z0-9_-]`.
    #[error("invalid store id: {0:?}")]
    InvalidStoreId(String),

    /// Persisted data failed validation.
    #[error("corrupt store '{store}': {reason}")]
    Corrupt { store: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("cache backend is not open")]
    NotOpen,

    #[error("cache backend already open on store '{0}'")]
    AlreadyOpen(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
