//! Registry entry types and the keys that address them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tome_types::{BlockId, Guid};

macro_rules! arena_key {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Raw arena index.
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

arena_key!(
    /// Address of a [`GroupEntry`] in a registry.
    GroupKey,
    "g"
);
arena_key!(
    /// Address of an [`InstanceEntry`] in a registry.
    InstanceKey,
    "i"
);
arena_key!(
    /// Address of a [`BlockEntry`] in a registry.
    BlockKey,
    "b"
);

/// A named node of the directory tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    /// Caller-defined bits; the engine never interprets them.
    pub flags: u32,
    pub(crate) parent: Option<GroupKey>,
    pub(crate) child_groups: Vec<GroupKey>,
    pub(crate) child_instances: Vec<InstanceKey>,
}

impl GroupEntry {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            flags: 0,
            parent: None,
            child_groups: Vec::new(),
            child_instances: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<GroupKey> {
        self.parent
    }

    /// Child groups in insertion order.
    pub fn child_groups(&self) -> &[GroupKey] {
        &self.child_groups
    }

    /// Child instances in insertion order.
    pub fn child_instances(&self) -> &[InstanceKey] {
        &self.child_instances
    }

    pub fn is_empty(&self) -> bool {
        self.child_groups.is_empty() && self.child_instances.is_empty()
    }
}

/// A leaf of the directory tree: one primary object plus named data streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub name: String,
    pub guid: Guid,
    /// Type name of the last object written, empty until then.
    pub primary_type_name: String,
    pub(crate) parent: Option<GroupKey>,
    pub(crate) object_block: Option<BlockKey>,
    pub(crate) data_blocks: BTreeMap<String, BlockKey>,
}

impl InstanceEntry {
    pub(crate) fn new(name: String, guid: Guid) -> Self {
        Self {
            name,
            guid,
            primary_type_name: String::new(),
            parent: None,
            object_block: None,
            data_blocks: BTreeMap::new(),
        }
    }

    pub fn parent(&self) -> Option<GroupKey> {
        self.parent
    }

    pub fn object_block(&self) -> Option<BlockKey> {
        self.object_block
    }

    /// Data stream names and their block entries, ordered by name.
    pub fn data_blocks(&self) -> &BTreeMap<String, BlockKey> {
        &self.data_blocks
    }

    pub fn data_block(&self, name: &str) -> Option<BlockKey> {
        self.data_blocks.get(name).copied()
    }

    /// Every block entry this instance owns, object block first.
    pub fn owned_blocks(&self) -> impl Iterator<Item = BlockKey> + '_ {
        self.object_block
            .into_iter()
            .chain(self.data_blocks.values().copied())
    }

    pub fn owns_blocks(&self) -> bool {
        self.object_block.is_some() || !self.data_blocks.is_empty()
    }
}

/// Indirection from a registry slot to a block id in the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub block_id: BlockId,
    pub(crate) owner: Option<InstanceKey>,
}

impl BlockEntry {
    pub(crate) fn new(block_id: BlockId) -> Self {
        Self {
            block_id,
            owner: None,
        }
    }

    pub fn owner(&self) -> Option<InstanceKey> {
        self.owner
    }
}
