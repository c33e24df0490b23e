use serde::{Deserialize, Serialize};
use tome_codec::CodecKind;
use tome_store::StoreConfig;

/// Configuration for opening or creating a [`Database`](crate::Database).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Open without write access. Nothing in the file changes, not even on close.
    pub read_only: bool,
    /// Make every finished block write durable before it returns.
    pub flush_always: bool,
    /// Codec for instance objects in newly created databases. An existing
    /// database keeps the codec it was created with.
    pub object_codec: CodecKind,
    /// Name given to the root group of a new database.
    pub root_name: String,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub max_pooled_readers: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            read_only: store.read_only,
            flush_always: store.flush_always,
            object_codec: CodecKind::default(),
            root_name: "root".into(),
            read_buffer_size: store.read_buffer_size,
            write_buffer_size: store.write_buffer_size,
            max_pooled_readers: store.max_pooled_readers,
        }
    }
}

impl DatabaseConfig {
    /// Defaults, opened read-only.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Defaults, with every write made durable before it returns.
    pub fn durable() -> Self {
        Self {
            flush_always: true,
            ..Default::default()
        }
    }

    /// The block store settings this configuration implies.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            read_only: self.read_only,
            flush_always: self.flush_always,
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            max_pooled_readers: self.max_pooled_readers,
        }
    }
}
