use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tome_types::BlockId;
use tracing::{debug, info, warn};

use crate::block::{Block, Extent};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::header::{HeaderSlot, HEADER_SIZE, SLOT_SIZE};
use crate::reader::{BlockReader, ReadPool};
use crate::toc::Toc;
use crate::writer::BlockWriter;

/// Point-in-time counters describing a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreStats {
    /// Allocated block ids, written or not.
    pub live_blocks: usize,
    /// Reclaimed ids waiting for reuse.
    pub free_ids: usize,
    /// Next never-issued id.
    pub next_id: BlockId,
    /// Bytes referenced by live blocks.
    pub live_bytes: u64,
    /// Bytes of superseded block and TOC regions.
    pub dead_bytes: u64,
    /// Offset new regions are appended at.
    pub end_offset: u64,
    /// Generation of the last committed header slot.
    pub generation: u64,
    /// Whether the in-memory table differs from the committed TOC.
    pub dirty: bool,
    /// Reader handles idle in the pool.
    pub pooled_readers: usize,
}

/// Block allocator and table of contents over a single backing file.
///
/// Single-writer: mutating calls take `&mut self`, and readers borrow the
/// store, so the store cannot be closed while a reader is checked out.
pub struct BlockStore {
    path: PathBuf,
    config: StoreConfig,
    file: File,
    blocks: BTreeMap<BlockId, Block>,
    free: BTreeSet<BlockId>,
    next_id: BlockId,
    dirty: bool,
    /// Offset past the furthest region ever written.
    end: u64,
    committed: Option<HeaderSlot>,
    /// Region of the committed TOC.
    toc_region: Option<Extent>,
    /// Region of the TOC the committed one superseded.
    spare: Option<Extent>,
    dead_bytes: u64,
    pool: ReadPool,
    closed: bool,
}

impl BlockStore {
    /// Format a new store file at `path`, replacing any existing file.
    ///
    /// Block 1 is allocated before this returns and the initial TOC is
    /// committed, so the file can be reopened immediately.
    pub fn create(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        if config.read_only {
            return Err(StoreError::ReadOnly);
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&[0u8; HEADER_SIZE as usize])?;
        file.sync_all()?;

        let pool = ReadPool::new(path, config.max_pooled_readers, config.read_buffer_size);
        let mut store = Self {
            path: path.to_path_buf(),
            config,
            file,
            blocks: BTreeMap::new(),
            free: BTreeSet::new(),
            next_id: BlockId::FIRST,
            dirty: true,
            end: HEADER_SIZE,
            committed: None,
            toc_region: None,
            spare: None,
            dead_bytes: 0,
            pool,
            closed: false,
        };

        let first = store.alloc_block_id()?;
        if first != BlockId::REGISTRY {
            return Err(StoreError::CorruptStore(format!(
                "first allocated block was {first}, expected {}",
                BlockId::REGISTRY
            )));
        }
        store.flush_toc()?;
        info!(path = %path.display(), "created block store");
        Ok(store)
    }

    /// Open an existing store file.
    ///
    /// Uses the newest header slot whose TOC validates; an older slot is
    /// only consulted when the newest one was torn by a crash.
    pub fn open(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(!config.read_only)
            .open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE {
            return Err(StoreError::CorruptStore(format!(
                "file is {file_len} bytes, shorter than the {HEADER_SIZE}-byte header"
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let mut slots = Vec::new();
        for (index, chunk) in header.chunks(SLOT_SIZE as usize).enumerate() {
            match HeaderSlot::from_bytes(chunk) {
                Ok(Some(slot)) => slots.push(slot),
                Ok(None) => {}
                Err(reason) => warn!(slot = index, %reason, "ignoring header slot"),
            }
        }
        slots.sort_by(|a, b| b.generation.cmp(&a.generation));

        let mut last_failure = String::from("no committed header slot");
        for slot in slots {
            match read_toc(&mut file, &slot, file_len) {
                Ok(toc) => {
                    let store = Self::from_toc(path, config, file, file_len, slot, toc);
                    info!(
                        path = %path.display(),
                        generation = slot.generation,
                        blocks = store.blocks.len(),
                        read_only = store.config.read_only,
                        "opened block store"
                    );
                    return Ok(store);
                }
                Err(StoreError::CorruptStore(reason)) => {
                    warn!(generation = slot.generation, %reason, "TOC unreadable; trying older slot");
                    last_failure = reason;
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::CorruptStore(last_failure))
    }

    fn from_toc(
        path: &Path,
        config: StoreConfig,
        file: File,
        file_len: u64,
        slot: HeaderSlot,
        toc: Toc,
    ) -> Self {
        let pool = ReadPool::new(path, config.max_pooled_readers, config.read_buffer_size);
        let toc_region = if toc.region.offset == slot.toc.offset && toc.region.len >= slot.toc.len
        {
            toc.region
        } else {
            slot.toc
        };
        Self {
            path: path.to_path_buf(),
            config,
            file,
            blocks: toc.blocks.into_iter().map(|b| (b.id, b)).collect(),
            free: toc.free.into_iter().collect(),
            next_id: toc.next_id,
            dirty: false,
            end: file_len.max(HEADER_SIZE),
            committed: Some(slot),
            toc_region: Some(toc_region),
            spare: toc.spare,
            dead_bytes: toc.dead_bytes,
            pool,
            closed: false,
        }
    }

    // ---------------------------------------------------------------
    // Allocation
    // ---------------------------------------------------------------

    /// Issue a block id: the lowest reclaimed id if any, else a new one.
    pub fn alloc_block_id(&mut self) -> StoreResult<BlockId> {
        self.ensure_writable()?;
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id = id.checked_next().ok_or(StoreError::IdSpaceExhausted)?;
                id
            }
        };
        self.blocks.insert(id, Block::unwritten(id));
        self.dirty = true;
        debug!(block = %id, "allocated block");
        Ok(id)
    }

    /// Release a live block id for reuse. Its region becomes dead space.
    pub fn free_block_id(&mut self, id: BlockId) -> StoreResult<()> {
        self.ensure_writable()?;
        if id.is_registry() {
            return Err(StoreError::ReservedBlock(id));
        }
        let block = self.blocks.remove(&id).ok_or(StoreError::NotFound(id))?;
        self.dead_bytes += block.size;
        self.free.insert(id);
        self.dirty = true;
        debug!(block = %id, reclaimed = block.size, "freed block");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Block I/O
    // ---------------------------------------------------------------

    /// Open a cursor over a block's current contents.
    pub fn read_block(&self, id: BlockId) -> StoreResult<BlockReader<'_>> {
        let block = *self.blocks.get(&id).ok_or(StoreError::NotFound(id))?;
        Ok(BlockReader::open(&self.pool, block)?)
    }

    /// Read a block's whole contents.
    pub fn read_block_bytes(&self, id: BlockId) -> StoreResult<Vec<u8>> {
        Ok(self.read_block(id)?.read_all()?)
    }

    /// Open a writer that replaces a block's contents on `finish`.
    pub fn write_block(&mut self, id: BlockId) -> StoreResult<BlockWriter<'_>> {
        self.ensure_writable()?;
        if !self.blocks.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        Ok(BlockWriter::new(self, id))
    }

    /// Replace a block's contents with `data`.
    pub fn write_block_bytes(&mut self, id: BlockId, data: &[u8]) -> StoreResult<Block> {
        let mut writer = self.write_block(id)?;
        writer.write_all(data)?;
        writer.finish()
    }

    pub(crate) fn append_offset(&self) -> u64 {
        self.end
    }

    pub(crate) fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Record a finished write. Called by [`BlockWriter::finish`].
    pub(crate) fn commit_block(&mut self, block: Block) -> StoreResult<()> {
        let previous = self.blocks.get(&block.id).copied().ok_or(StoreError::NotFound(block.id))?;
        self.blocks.insert(block.id, block);
        self.dead_bytes += previous.size;
        self.end = self.end.max(block.extent().end());
        self.dirty = true;
        debug!(block = %block.id, offset = block.offset, size = block.size, "committed block write");
        if self.config.flush_always {
            self.file.sync_data()?;
            self.flush_toc()?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // TOC persistence
    // ---------------------------------------------------------------

    /// Durably persist the block table if it changed. Returns whether a
    /// new TOC was committed.
    ///
    /// The TOC is encoded in full, written to a region no live header slot
    /// points at, and synced before the header slot naming it is written.
    pub fn flush_toc(&mut self) -> StoreResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.ensure_writable()?;

        let generation = self.committed.map_or(1, |slot| slot.generation + 1);
        let retiring = self.toc_region;
        let mut toc = Toc {
            next_id: self.next_id,
            free: self.free.iter().copied().collect(),
            blocks: self.blocks.values().copied().collect(),
            region: Extent::default(),
            spare: retiring,
            dead_bytes: self.dead_bytes,
        };

        let len = toc.encoded_len()?;
        toc.region = match self.spare {
            Some(spare) if spare.len >= len => spare,
            Some(spare) => {
                toc.dead_bytes += spare.len;
                Extent::new(self.end, len)
            }
            None => Extent::new(self.end, len),
        };
        let bytes = toc.encode()?;

        self.file.seek(SeekFrom::Start(toc.region.offset))?;
        self.file.write_all(&bytes)?;
        self.file.sync_data()?;

        let slot = HeaderSlot {
            generation,
            toc: Extent::new(toc.region.offset, bytes.len() as u64),
            toc_crc: crc32fast::hash(&bytes),
        };
        self.file.seek(SeekFrom::Start(HeaderSlot::offset_for(generation)))?;
        self.file.write_all(&slot.to_bytes())?;
        self.file.sync_data()?;

        self.end = self.end.max(toc.region.end());
        self.dead_bytes = toc.dead_bytes;
        self.spare = retiring;
        self.toc_region = Some(toc.region);
        self.committed = Some(slot);
        self.dirty = false;
        debug!(
            generation,
            offset = toc.region.offset,
            len = bytes.len(),
            blocks = toc.blocks.len(),
            "flushed TOC"
        );
        Ok(true)
    }

    /// Flush the TOC if dirty, release pooled readers and close the file.
    pub fn close(mut self) -> StoreResult<()> {
        let result = self.shutdown();
        self.closed = true;
        result
    }

    fn shutdown(&mut self) -> StoreResult<()> {
        let released = self.pool.drain();
        if !self.config.read_only {
            self.flush_toc()?;
            self.file.sync_all()?;
        }
        info!(path = %self.path.display(), released_readers = released, "closed block store");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Live block ids, ascending.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.keys().copied()
    }

    /// Reclaimed ids in the order they will be reissued.
    pub fn free_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.free.iter().copied()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            live_blocks: self.blocks.len(),
            free_ids: self.free.len(),
            next_id: self.next_id,
            live_bytes: self.blocks.values().map(|b| b.size).sum(),
            dead_bytes: self.dead_bytes,
            end_offset: self.end,
            generation: self.committed.map_or(0, |slot| slot.generation),
            dirty: self.dirty,
            pooled_readers: self.pool.idle_count(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.config.read_only {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

/// Dropping an unclosed store never flushes; the file keeps its last
/// committed TOC.
impl Drop for BlockStore {
    fn drop(&mut self) {
        if self.closed || self.config.read_only || !self.dirty {
            return;
        }
        warn!(
            path = %self.path.display(),
            generation = self.committed.map_or(0, |slot| slot.generation),
            "block store dropped without close; uncommitted changes discarded"
        );
    }
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("path", &self.path)
            .field("blocks", &self.blocks.len())
            .field("free", &self.free.len())
            .field("next_id", &self.next_id)
            .field("dirty", &self.dirty)
            .finish()
    }
}

fn read_toc(file: &mut File, slot: &HeaderSlot, file_len: u64) -> StoreResult<Toc> {
    let in_bounds = slot.toc.offset >= HEADER_SIZE
        && slot.toc.checked_end().is_some_and(|end| end <= file_len);
    if !in_bounds {
        return Err(StoreError::CorruptStore(format!(
            "TOC region at {} (+{} bytes) outside file of {file_len} bytes",
            slot.toc.offset, slot.toc.len
        )));
    }
    let len = usize::try_from(slot.toc.len)
        .map_err(|_| StoreError::CorruptStore(format!("TOC length {} too large", slot.toc.len)))?;
    let mut bytes = vec![0u8; len];
    file.seek(SeekFrom::Start(slot.toc.offset))?;
    file.read_exact(&mut bytes)?;

    let actual = crc32fast::hash(&bytes);
    if actual != slot.toc_crc {
        return Err(StoreError::CorruptStore(format!(
            "TOC CRC mismatch: expected {:#010x}, got {actual:#010x}",
            slot.toc_crc
        )));
    }
    let toc = Toc::decode(&bytes)?;
    toc.validate(file_len)?;
    Ok(toc)
}
