use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tome_types::BlockId;

use crate::block::{Block, Extent};
use crate::error::{StoreError, StoreResult};
use crate::header::HEADER_SIZE;

/// Serialized table of contents: everything needed to rebuild the block
/// table and allocator state on open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Toc {
    /// Next never-issued block id.
    pub next_id: BlockId,
    /// Reclaimed ids, ascending.
    pub free: Vec<BlockId>,
    /// Live blocks, ascending by id.
    pub blocks: Vec<Block>,
    /// The region this TOC was written into (may exceed its encoded length).
    pub region: Extent,
    /// The region of the TOC this one superseded, reusable by the next flush.
    pub spare: Option<Extent>,
    /// Bytes of superseded block and TOC regions.
    pub dead_bytes: u64,
}

impl Toc {
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Encoded length in bytes. Depends only on the number of entries.
    pub fn encoded_len(&self) -> StoreResult<u64> {
        bincode::serialized_size(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| StoreError::CorruptStore(format!("TOC decode failed: {e}")))
    }

    /// Check the TOC is internally consistent and fits inside a file of
    /// `file_len` bytes.
    pub fn validate(&self, file_len: u64) -> StoreResult<()> {
        let corrupt = |reason: String| Err(StoreError::CorruptStore(reason));

        let mut live = BTreeSet::new();
        for block in &self.blocks {
            if !live.insert(block.id) {
                return corrupt(format!("block {} listed twice", block.id));
            }
            if block.id >= self.next_id {
                return corrupt(format!(
                    "block {} at or beyond next id {}",
                    block.id, self.next_id
                ));
            }
            if block.size > 0 {
                let end = block.extent().checked_end();
                if block.offset < HEADER_SIZE || end.map_or(true, |end| end > file_len) {
                    return corrupt(format!(
                        "block {} region at {} (+{} bytes) outside file of {file_len} bytes",
                        block.id, block.offset, block.size
                    ));
                }
            }
        }
        if !live.contains(&BlockId::REGISTRY) {
            return corrupt(format!("reserved block {} missing", BlockId::REGISTRY));
        }
        for id in &self.free {
            if live.contains(id) {
                return corrupt(format!("block {id} is both live and free"));
            }
            if *id >= self.next_id {
                return corrupt(format!("free id {id} at or beyond next id {}", self.next_id));
            }
        }
        Ok(())
    }
}
