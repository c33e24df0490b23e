use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Address of a block inside a store file.
///
/// Ids are issued by the store's allocator starting at 1. Id 0 is never
/// issued, and id 1 is permanently reserved for the encoded registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(u32);

impl BlockId {
    /// The block holding the encoded registry. Always the first id allocated.
    pub const REGISTRY: Self = Self(1);

    /// The first id an empty allocator hands out.
    pub const FIRST: Self = Self(1);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The id issued after this one, or `None` once the id space is exhausted.
    pub fn checked_next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Returns `true` for the reserved registry block.
    pub fn is_registry(self) -> bool {
        self == Self::REGISTRY
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for BlockId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix('#').unwrap_or(s);
        let value: u32 = raw
            .parse()
            .map_err(|_| TypeError::InvalidBlockId(s.to_string()))?;
        if value == 0 {
            return Err(TypeError::InvalidBlockId(s.to_string()));
        }
        Ok(Self(value))
    }
}

impl From<BlockId> for u32 {
    fn from(id: BlockId) -> Self {
        id.0
    }
}
