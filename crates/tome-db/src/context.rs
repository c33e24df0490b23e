use tome_codec::CodecKind;
use tome_registry::{
    BlockKey, GroupEntry, GroupKey, InstanceEntry, InstanceKey, Registry, RegistryError,
};
use tome_store::{BlockStore, StoreError};
use tome_types::BlockId;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// Borrowed view of a database's store and registry, passed to every node
/// operation.
///
/// Holding a context locks the database: it cannot be synced or closed until
/// the context is dropped.
pub struct DirectoryContext<'a> {
    pub(crate) store: &'a mut BlockStore,
    pub(crate) registry: &'a mut Registry,
    read_only: bool,
}

impl<'a> DirectoryContext<'a> {
    pub fn new(store: &'a mut BlockStore, registry: &'a mut Registry) -> Self {
        let read_only = store.is_read_only();
        Self {
            store,
            registry,
            read_only,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn store(&self) -> &BlockStore {
        &*self.store
    }

    pub fn registry(&self) -> &Registry {
        &*self.registry
    }

    /// Codec used for instance objects.
    pub fn codec(&self) -> CodecKind {
        self.registry.object_codec()
    }

    pub(crate) fn ensure_writable(&self) -> DbResult<()> {
        if self.read_only {
            Err(DbError::ReadOnly)
        } else {
            Ok(())
        }
    }

    pub(crate) fn group_entry(&self, key: GroupKey) -> DbResult<&GroupEntry> {
        self.registry.group(key).map_err(stale)
    }

    pub(crate) fn group_entry_mut(&mut self, key: GroupKey) -> DbResult<&mut GroupEntry> {
        self.registry.group_mut(key).map_err(stale)
    }

    pub(crate) fn instance_entry(&self, key: InstanceKey) -> DbResult<&InstanceEntry> {
        self.registry.instance(key).map_err(stale)
    }

    pub(crate) fn instance_entry_mut(&mut self, key: InstanceKey) -> DbResult<&mut InstanceEntry> {
        self.registry.instance_mut(key).map_err(stale)
    }

    pub(crate) fn block_id(&self, key: BlockKey) -> DbResult<BlockId> {
        Ok(self.registry.block_entry(key).map_err(stale)?.block_id)
    }

    /// Allocate a block id and an unowned entry for it.
    pub(crate) fn allocate_block(&mut self) -> DbResult<(BlockId, BlockKey)> {
        let id = self.store.alloc_block_id()?;
        let key = self.registry.create_block_entry(id);
        Ok((id, key))
    }

    /// Free an entry's block id, then drop the entry.
    ///
    /// An entry whose id is already gone from the store is dropped anyway.
    /// On durable stores the registry is persisted straight away.
    pub(crate) fn release_block(&mut self, key: BlockKey) -> DbResult<()> {
        let id = self.block_id(key)?;
        match self.store.free_block_id(id) {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                warn!(entry = %key, block = %id, "block entry referenced a missing block");
            }
            Err(e) => return Err(e.into()),
        }
        self.registry.remove_block(key)?;
        debug!(entry = %key, block = %id, "released block");
        if self.store.config().flush_always {
            self.persist_registry()?;
        }
        Ok(())
    }

    /// Write the registry to its block and commit the TOC.
    ///
    /// The persisted registry must never name an id the committed TOC lists
    /// as free.
    pub(crate) fn persist_registry(&mut self) -> DbResult<()> {
        let bytes = self.registry.encode()?;
        self.store.write_block_bytes(BlockId::REGISTRY, &bytes)?;
        self.store.flush_toc()?;
        Ok(())
    }
}

impl std::fmt::Debug for DirectoryContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryContext")
            .field("store", &self.store.path())
            .field("registry", &self.registry)
            .field("read_only", &self.read_only)
            .finish()
    }
}

fn stale(err: RegistryError) -> DbError {
    match err {
        RegistryError::GroupNotFound(key) => DbError::NotFound(format!("group {key}")),
        RegistryError::InstanceNotFound(key) => DbError::NotFound(format!("instance {key}")),
        RegistryError::BlockEntryNotFound(key) => DbError::NotFound(format!("block entry {key}")),
        other => DbError::Registry(other),
    }
}
