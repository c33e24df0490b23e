use serde::{Deserialize, Serialize};

/// Configuration for a [`BlockStore`](crate::BlockStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Open the backing file without write access. Every mutating call
    /// fails with `ReadOnly` and the file is never touched.
    pub read_only: bool,
    /// Sync block data and flush the TOC after every finished block write.
    /// When `false`, durability is deferred to `flush_toc` and `close`.
    pub flush_always: bool,
    /// Buffer size of each pooled block reader.
    pub read_buffer_size: usize,
    /// Bytes a block writer accumulates before writing through to the file.
    pub write_buffer_size: usize,
    /// Idle reader handles kept open for reuse.
    pub max_pooled_readers: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            flush_always: false,
            read_buffer_size: 8 * 1024,
            write_buffer_size: 64 * 1024,
            max_pooled_readers: 8,
        }
    }
}

impl StoreConfig {
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
}
