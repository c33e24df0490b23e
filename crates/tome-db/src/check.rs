//! Cross-checks between the block store and the registry.

use std::collections::BTreeSet;

use tome_registry::{BlockKey, Registry, Unreachable};
use tome_store::BlockStore;
use tome_types::BlockId;

/// Result of [`Database::check`](crate::Database::check).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Live block ids in the store, the registry block included.
    pub live_blocks: usize,
    /// Allocated blocks no registry entry references.
    pub orphaned_blocks: Vec<BlockId>,
    /// Block entries whose id is not live in the store.
    pub dangling_entries: Vec<(BlockKey, BlockId)>,
    /// Registry entries not reachable from the root group.
    pub unreachable: Unreachable,
    /// First structural inconsistency found in the registry, if any.
    pub registry_error: Option<String>,
}

impl CheckReport {
    pub(crate) fn run(store: &BlockStore, registry: &Registry) -> Self {
        let live: BTreeSet<BlockId> = store.block_ids().collect();
        let referenced = registry.referenced_blocks();

        let orphaned_blocks = live
            .iter()
            .filter(|id| !id.is_registry() && !referenced.contains(*id))
            .copied()
            .collect();
        let dangling_entries = registry
            .block_entries()
            .filter(|(_, entry)| !live.contains(&entry.block_id))
            .map(|(key, entry)| (key, entry.block_id))
            .collect();

        Self {
            live_blocks: live.len(),
            orphaned_blocks,
            dangling_entries,
            unreachable: registry.unreachable(),
            registry_error: registry.validate().err().map(|e| e.to_string()),
        }
    }

    pub fn problem_count(&self) -> usize {
        self.orphaned_blocks.len()
            + self.dangling_entries.len()
            + self.unreachable.groups.len()
            + self.unreachable.instances.len()
            + self.unreachable.blocks.len()
            + usize::from(self.registry_error.is_some())
    }

    pub fn is_clean(&self) -> bool {
        self.problem_count() == 0
    }
}
