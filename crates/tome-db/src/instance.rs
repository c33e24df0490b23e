use serde::de::DeserializeOwned;
use serde::Serialize;
use tome_codec::Codec;
use tome_registry::InstanceKey;
use tome_store::{BlockReader, BlockWriter};
use tome_types::Guid;
use tracing::debug;

use crate::context::DirectoryContext;
use crate::error::{DbError, DbResult};

/// Handle to an instance: one typed primary object plus named data streams.
#[derive(Debug, PartialEq, Eq)]
pub struct Instance {
    key: InstanceKey,
}

impl Instance {
    pub(crate) fn new(key: InstanceKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> InstanceKey {
        self.key
    }

    pub fn name<'c>(&self, ctx: &'c DirectoryContext<'_>) -> DbResult<&'c str> {
        Ok(&ctx.instance_entry(self.key)?.name)
    }

    /// Rename in place. Sibling names are not checked for uniqueness.
    pub fn set_name(
        &self,
        ctx: &mut DirectoryContext<'_>,
        name: impl Into<String>,
    ) -> DbResult<()> {
        ctx.ensure_writable()?;
        ctx.instance_entry_mut(self.key)?.name = name.into();
        Ok(())
    }

    pub fn guid(&self, ctx: &DirectoryContext<'_>) -> DbResult<Guid> {
        Ok(ctx.instance_entry(self.key)?.guid)
    }

    pub fn set_guid(&self, ctx: &mut DirectoryContext<'_>, guid: Guid) -> DbResult<()> {
        ctx.ensure_writable()?;
        ctx.instance_entry_mut(self.key)?.guid = guid;
        Ok(())
    }

    /// Type name of the last object stored, empty if none was.
    pub fn primary_type_name<'c>(&self, ctx: &'c DirectoryContext<'_>) -> DbResult<&'c str> {
        Ok(&ctx.instance_entry(self.key)?.primary_type_name)
    }

    pub fn has_object(&self, ctx: &DirectoryContext<'_>) -> DbResult<bool> {
        Ok(ctx.instance_entry(self.key)?.object_block().is_some())
    }

    /// Cursor over the encoded primary object. `Ok(None)` if none was ever
    /// stored.
    pub fn object_reader<'c>(
        &self,
        ctx: &'c DirectoryContext<'_>,
    ) -> DbResult<Option<BlockReader<'c>>> {
        let Some(block) = ctx.instance_entry(self.key)?.object_block() else {
            return Ok(None);
        };
        let id = ctx.block_id(block)?;
        Ok(Some(ctx.store.read_block(id)?))
    }

    /// Decode the primary object. `Ok(None)` if none was ever stored.
    pub fn get_object<T: DeserializeOwned>(
        &self,
        ctx: &DirectoryContext<'_>,
    ) -> DbResult<Option<T>> {
        let Some(reader) = self.object_reader(ctx)? else {
            return Ok(None);
        };
        ctx.codec()
            .decode_from(reader)
            .map(Some)
            .map_err(|e| DbError::Corrupt {
                instance: self.name(ctx).unwrap_or_default().to_string(),
                reason: e.to_string(),
            })
    }

    /// Encode `value` as the primary object, replacing any previous one.
    ///
    /// The object block is allocated before encoding starts. If encoding
    /// fails the block stays allocated and its contents are unchanged.
    pub fn set_object<T: Serialize + ?Sized>(
        &self,
        ctx: &mut DirectoryContext<'_>,
        value: &T,
    ) -> DbResult<()> {
        ctx.ensure_writable()?;
        let existing = ctx.instance_entry(self.key)?.object_block();
        let id = match existing {
            Some(block) => ctx.block_id(block)?,
            None => {
                let (id, block) = ctx.allocate_block()?;
                ctx.registry.attach_object_block(self.key, block)?;
                id
            }
        };
        let codec = ctx.codec();
        let mut writer = ctx.store.write_block(id)?;
        codec.encode_into(&mut writer, value)?;
        let block = writer.finish()?;

        let type_name = std::any::type_name::<T>();
        ctx.instance_entry_mut(self.key)?.primary_type_name = type_name.to_string();
        debug!(instance = %self.key, block = %id, size = block.size, type_name, "stored object");
        Ok(())
    }

    /// Names of the instance's data streams, in sorted order.
    pub fn data_names(&self, ctx: &DirectoryContext<'_>) -> DbResult<Vec<String>> {
        Ok(ctx
            .instance_entry(self.key)?
            .data_blocks()
            .keys()
            .cloned()
            .collect())
    }

    pub fn has_data(&self, ctx: &DirectoryContext<'_>, name: &str) -> DbResult<bool> {
        Ok(ctx.instance_entry(self.key)?.data_block(name).is_some())
    }

    /// Open the data stream called `name` for reading.
    pub fn read_data<'c>(
        &self,
        ctx: &'c DirectoryContext<'_>,
        name: &str,
    ) -> DbResult<BlockReader<'c>> {
        let block = ctx
            .instance_entry(self.key)?
            .data_block(name)
            .ok_or_else(|| DbError::NotFound(format!("data stream {name:?}")))?;
        let id = ctx.block_id(block)?;
        Ok(ctx.store.read_block(id)?)
    }

    /// Open the data stream called `name` for writing, creating it on
    /// first use. The stream's contents are replaced when the writer is
    /// finished.
    pub fn write_data<'c>(
        &self,
        ctx: &'c mut DirectoryContext<'_>,
        name: &str,
    ) -> DbResult<BlockWriter<'c>> {
        ctx.ensure_writable()?;
        let existing = ctx.instance_entry(self.key)?.data_block(name);
        let id = match existing {
            Some(block) => ctx.block_id(block)?,
            None => {
                let (id, block) = ctx.allocate_block()?;
                ctx.registry.attach_data_block(self.key, name, block)?;
                debug!(instance = %self.key, stream = name, block = %id, "created data stream");
                id
            }
        };
        Ok(ctx.store.write_block(id)?)
    }

    /// Delete the data stream called `name` and free its block.
    pub fn remove_data(&self, ctx: &mut DirectoryContext<'_>, name: &str) -> DbResult<()> {
        ctx.ensure_writable()?;
        let block = ctx
            .instance_entry(self.key)?
            .data_block(name)
            .ok_or_else(|| DbError::NotFound(format!("data stream {name:?}")))?;
        ctx.release_block(block)
    }

    /// Free every block the instance owns, data streams first, then detach
    /// it from its group. The handle is stale afterwards.
    pub fn remove(&self, ctx: &mut DirectoryContext<'_>) -> DbResult<()> {
        ctx.ensure_writable()?;
        let entry = ctx.instance_entry(self.key)?;
        let data: Vec<_> = entry.data_blocks().values().copied().collect();
        let object = entry.object_block();

        for block in data {
            ctx.release_block(block)?;
        }
        if let Some(block) = object {
            ctx.release_block(block)?;
        }
        ctx.registry.remove_instance(self.key)?;
        debug!(instance = %self.key, "removed instance");
        Ok(())
    }
}
