use std::io::{self, Seek, SeekFrom, Write};

use tome_types::BlockId;
use tracing::warn;

use crate::block::Block;
use crate::error::StoreResult;
use crate::store::BlockStore;

/// Buffered writer that replaces a block's contents.
///
/// Bytes are appended at the end of the backing file, never over the
/// block's current region, so an unfinished write leaves the block as it
/// was. [`finish`](Self::finish) points the block at the new region; a
/// writer dropped without `finish` discards what it wrote.
pub struct BlockWriter<'a> {
    store: &'a mut BlockStore,
    id: BlockId,
    start: u64,
    flushed: u64,
    buf: Vec<u8>,
    capacity: usize,
    finished: bool,
}

impl<'a> BlockWriter<'a> {
    pub(crate) fn new(store: &'a mut BlockStore, id: BlockId) -> Self {
        let start = store.append_offset();
        let capacity = store.config().write_buffer_size.max(1);
        Self {
            store,
            id,
            start,
            flushed: 0,
            buf: Vec::with_capacity(capacity),
            capacity,
            finished: false,
        }
    }

    /// The block being written.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Bytes accepted so far, buffered or not.
    pub fn bytes_written(&self) -> u64 {
        self.flushed + self.buf.len() as u64
    }

    /// Write out buffered bytes and commit the new contents to the block.
    ///
    /// Returns the block as now recorded in the table. With `flush_always`
    /// the data is synced and the TOC flushed before this returns.
    pub fn finish(mut self) -> StoreResult<Block> {
        self.flush_buffer()?;
        self.finished = true;
        let block = Block {
            id: self.id,
            offset: self.start,
            size: self.flushed,
        };
        self.store.commit_block(block)?;
        Ok(block)
    }

    fn write_at_cursor(&mut self, data: &[u8]) -> io::Result<()> {
        let file = self.store.file_mut();
        file.seek(SeekFrom::Start(self.start + self.flushed))?;
        file.write_all(data)?;
        self.flushed += data.len() as u64;
        Ok(())
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let buf = std::mem::take(&mut self.buf);
        let result = self.write_at_cursor(&buf);
        self.buf = buf;
        self.buf.clear();
        result
    }
}

impl Write for BlockWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() + data.len() > self.capacity {
            self.flush_buffer()?;
        }
        if data.len() >= self.capacity {
            self.write_at_cursor(data)?;
        } else {
            self.buf.extend_from_slice(data);
        }
        Ok(data.len())
    }

    /// Pushes buffered bytes to the file. Does not commit the block.
    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()?;
        self.store.file_mut().flush()
    }
}

impl Drop for BlockWriter<'_> {
    fn drop(&mut self) {
        if !self.finished && self.bytes_written() > 0 {
            warn!(
                block = %self.id,
                bytes = self.bytes_written(),
                "block writer dropped without finish; write discarded"
            );
        }
    }
}

impl std::fmt::Debug for BlockWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockWriter")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}
