use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tome_types::BlockId;

use crate::block::Block;

/// Pool of read-only file handles shared by all block readers of a store.
///
/// Handles are opened lazily, handed out on [`BlockReader`] creation and
/// returned when the reader drops. At most `capacity` idle handles are kept.
#[derive(Debug)]
pub(crate) struct ReadPool {
    path: PathBuf,
    idle: Mutex<Vec<File>>,
    capacity: usize,
    buffer_size: usize,
}

impl ReadPool {
    pub fn new(path: &Path, capacity: usize, buffer_size: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            idle: Mutex::new(Vec::new()),
            capacity,
            buffer_size,
        }
    }

    fn checkout(&self) -> io::Result<File> {
        let pooled = self.lock().pop();
        match pooled {
            Some(file) => Ok(file),
            None => File::open(&self.path),
        }
    }

    fn checkin(&self, file: File) {
        let mut idle = self.lock();
        if idle.len() < self.capacity {
            idle.push(file);
        }
    }

    /// Number of idle handles waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.lock().len()
    }

    /// Close every idle handle. Returns how many were closed.
    pub fn drain(&self) -> usize {
        let mut idle = self.lock();
        let count = idle.len();
        idle.clear();
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<File>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Buffered cursor over exactly one block's bytes.
///
/// Reads never go past the end of the block, and seeks are relative to the
/// block start. The underlying file handle goes back to the store's pool
/// when the reader is dropped.
pub struct BlockReader<'a> {
    pool: &'a ReadPool,
    inner: Option<BufReader<File>>,
    block: Block,
    pos: u64,
}

impl<'a> BlockReader<'a> {
    pub(crate) fn open(pool: &'a ReadPool, block: Block) -> io::Result<Self> {
        let file = pool.checkout()?;
        let mut inner = BufReader::with_capacity(pool.buffer_size, file);
        inner.seek(SeekFrom::Start(block.offset))?;
        Ok(Self {
            pool,
            inner: Some(inner),
            block,
            pos: 0,
        })
    }

    /// The block being read.
    pub fn id(&self) -> BlockId {
        self.block.id
    }

    /// Total size of the block in bytes.
    pub fn len(&self) -> u64 {
        self.block.size
    }

    pub fn is_empty(&self) -> bool {
        self.block.size == 0
    }

    /// Current position relative to the block start.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read the rest of the block into a buffer.
    pub fn read_all(mut self) -> io::Result<Vec<u8>> {
        let remaining = self.block.size.saturating_sub(self.pos);
        let mut buf = Vec::with_capacity(usize::try_from(remaining).unwrap_or(0));
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn inner(&mut self) -> io::Result<&mut BufReader<File>> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::other("block reader already released"))
    }
}

impl Read for BlockReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.block.size.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.inner()?.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for BlockReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.block.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the block",
            )
        })?;
        let absolute = self.block.offset + target;
        self.inner()?.seek(SeekFrom::Start(absolute))?;
        self.pos = target;
        Ok(target)
    }
}

impl Drop for BlockReader<'_> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            self.pool.checkin(inner.into_inner());
        }
    }
}

impl std::fmt::Debug for BlockReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReader")
            .field("block", &self.block)
            .field("pos", &self.pos)
            .finish()
    }
}
