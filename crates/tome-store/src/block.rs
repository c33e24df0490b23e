use serde::{Deserialize, Serialize};
use tome_types::BlockId;

/// A contiguous byte range of the backing file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub offset: u64,
    pub len: u64,
}

impl Extent {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// First byte past the extent.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    /// First byte past the extent, `None` if it would overflow. Use for
    /// extents read back from disk.
    pub fn checked_end(&self) -> Option<u64> {
        self.offset.checked_add(self.len)
    }
}

/// A live block: its id and where its current contents live.
///
/// A block that has been allocated but never written has `size == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub offset: u64,
    pub size: u64,
}

impl Block {
    /// A freshly allocated block with no contents yet.
    pub fn unwritten(id: BlockId) -> Self {
        Self {
            id,
            offset: 0,
            size: 0,
        }
    }

    /// The file region holding this block's bytes.
    pub fn extent(&self) -> Extent {
        Extent::new(self.offset, self.size)
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
