use tome_types::BlockId;

/// Errors from block store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The block id is not live in this store.
    #[error("block not found: {0}")]
    NotFound(BlockId),

    /// The header or TOC cannot be read back; the store cannot be opened.
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    /// The operation would release a block the store reserves for itself.
    #[error("block {0} is reserved")]
    ReservedBlock(BlockId),

    /// Every block id has been issued.
    #[error("block id space exhausted")]
    IdSpaceExhausted,

    /// The store was opened read-only.
    #[error("store is read-only")]
    ReadOnly,

    /// TOC serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the backing file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
