use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// A node whose entry was removed, or a missing data stream.
    #[error("not found: {0}")]
    NotFound(String),

    /// Block 1 could not be decoded into a registry.
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    /// An instance object failed to decode.
    #[error("corrupt object in instance {instance}: {reason}")]
    Corrupt { instance: String, reason: String },

    #[error("database is read-only")]
    ReadOnly,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("store error: {0}")]
    Store(#[from] tome_store::StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] tome_registry::RegistryError),

    #[error("codec error: {0}")]
    Codec(#[from] tome_codec::CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;
