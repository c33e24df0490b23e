use std::collections::BTreeMap;

use tome_registry::{GroupKey, InstanceKey, Registry};
use tome_types::Guid;
use tracing::debug;

use crate::context::DirectoryContext;
use crate::error::{DbError, DbResult};
use crate::instance::Instance;

/// Handle to a group in the directory tree.
///
/// A group keeps a cache of child handles, rebuilt against the registry by
/// key whenever children are accessed. Handles of children that still exist
/// survive a rebuild, together with their own caches.
#[derive(Debug)]
pub struct Group {
    key: GroupKey,
    groups: Vec<Group>,
    instances: Vec<Instance>,
}

impl Group {
    pub(crate) fn new(key: GroupKey) -> Self {
        Self {
            key,
            groups: Vec::new(),
            instances: Vec::new(),
        }
    }

    pub fn key(&self) -> GroupKey {
        self.key
    }

    pub fn is_root(&self, ctx: &DirectoryContext<'_>) -> bool {
        ctx.registry.root_key() == Some(self.key)
    }

    pub fn name<'c>(&self, ctx: &'c DirectoryContext<'_>) -> DbResult<&'c str> {
        Ok(&ctx.group_entry(self.key)?.name)
    }

    /// Rename in place. Sibling names are not checked for uniqueness.
    pub fn rename(
        &self,
        ctx: &mut DirectoryContext<'_>,
        name: impl Into<String>,
    ) -> DbResult<()> {
        ctx.ensure_writable()?;
        ctx.group_entry_mut(self.key)?.name = name.into();
        Ok(())
    }

    pub fn flags(&self, ctx: &DirectoryContext<'_>) -> DbResult<u32> {
        Ok(ctx.group_entry(self.key)?.flags)
    }

    pub fn set_flags(&self, ctx: &mut DirectoryContext<'_>, flags: u32) -> DbResult<()> {
        ctx.ensure_writable()?;
        ctx.group_entry_mut(self.key)?.flags = flags;
        Ok(())
    }

    /// Append a new empty child group.
    pub fn create_group(
        &mut self,
        ctx: &mut DirectoryContext<'_>,
        name: impl Into<String>,
    ) -> DbResult<&mut Group> {
        ctx.ensure_writable()?;
        ctx.group_entry(self.key)?;
        let key = ctx.registry.create_group_entry(name);
        ctx.registry.attach_group(self.key, key)?;
        debug!(parent = %self.key, group = %key, "created group");
        self.sync(ctx.registry())?;
        self.cached_group(key)
    }

    /// Append a new instance with no object and no data streams.
    pub fn create_instance(
        &mut self,
        ctx: &mut DirectoryContext<'_>,
        name: impl Into<String>,
        guid: Guid,
    ) -> DbResult<&mut Instance> {
        ctx.ensure_writable()?;
        ctx.group_entry(self.key)?;
        let key = ctx.registry.create_instance_entry(name, guid);
        ctx.registry.attach_instance(self.key, key)?;
        debug!(parent = %self.key, instance = %key, "created instance");
        self.sync(ctx.registry())?;
        self.cached_instance(key)
    }

    /// Child groups and instances, each in insertion order.
    pub fn children(
        &mut self,
        ctx: &DirectoryContext<'_>,
    ) -> DbResult<(&mut [Group], &mut [Instance])> {
        self.sync(ctx.registry())?;
        Ok((self.groups.as_mut_slice(), self.instances.as_mut_slice()))
    }

    /// First child group called `name`.
    pub fn child_group(
        &mut self,
        ctx: &DirectoryContext<'_>,
        name: &str,
    ) -> DbResult<Option<&mut Group>> {
        ctx.group_entry(self.key)?;
        match ctx.registry.child_group_named(self.key, name)? {
            Some(key) => {
                self.sync(ctx.registry())?;
                self.cached_group(key).map(Some)
            }
            None => Ok(None),
        }
    }

    /// First child instance called `name`.
    pub fn child_instance(
        &mut self,
        ctx: &DirectoryContext<'_>,
        name: &str,
    ) -> DbResult<Option<&mut Instance>> {
        ctx.group_entry(self.key)?;
        match ctx.registry.child_instance_named(self.key, name)? {
            Some(key) => {
                self.sync(ctx.registry())?;
                self.cached_instance(key).map(Some)
            }
            None => Ok(None),
        }
    }

    /// First child group called `name`, created if there is none.
    pub fn ensure_group(
        &mut self,
        ctx: &mut DirectoryContext<'_>,
        name: &str,
    ) -> DbResult<&mut Group> {
        ctx.group_entry(self.key)?;
        match ctx.registry.child_group_named(self.key, name)? {
            Some(key) => {
                self.sync(ctx.registry())?;
                self.cached_group(key)
            }
            None => self.create_group(ctx, name),
        }
    }

    /// Remove every descendant instance (freeing its blocks) and group, then
    /// detach this group. The root group cannot be removed.
    pub fn remove(&mut self, ctx: &mut DirectoryContext<'_>) -> DbResult<()> {
        ctx.ensure_writable()?;
        ctx.group_entry(self.key)?;
        if self.is_root(ctx) {
            return Err(DbError::InvalidOperation(
                "the root group cannot be removed".into(),
            ));
        }
        let (groups, instances) = ctx.registry.subtree(self.key)?;
        for key in &instances {
            Instance::new(*key).remove(ctx)?;
        }
        for key in &groups {
            ctx.registry.remove_group(*key)?;
        }
        self.groups.clear();
        self.instances.clear();
        debug!(
            group = %self.key,
            groups = groups.len(),
            instances = instances.len(),
            "removed group"
        );
        Ok(())
    }

    fn sync(&mut self, registry: &Registry) -> DbResult<()> {
        let entry = registry
            .group(self.key)
            .map_err(|_| DbError::NotFound(format!("group {}", self.key)))?;

        let cached: Vec<GroupKey> = self.groups.iter().map(|g| g.key).collect();
        if cached != entry.child_groups() {
            let mut old: BTreeMap<GroupKey, Group> =
                self.groups.drain(..).map(|g| (g.key, g)).collect();
            self.groups = entry
                .child_groups()
                .iter()
                .map(|k| old.remove(k).unwrap_or_else(|| Group::new(*k)))
                .collect();
        }

        let cached: Vec<InstanceKey> = self.instances.iter().map(Instance::key).collect();
        if cached != entry.child_instances() {
            self.instances = entry
                .child_instances()
                .iter()
                .map(|k| Instance::new(*k))
                .collect();
        }
        Ok(())
    }

    fn cached_group(&mut self, key: GroupKey) -> DbResult<&mut Group> {
        self.groups
            .iter_mut()
            .find(|g| g.key == key)
            .ok_or_else(|| DbError::NotFound(format!("group {key}")))
    }

    fn cached_instance(&mut self, key: InstanceKey) -> DbResult<&mut Instance> {
        self.instances
            .iter_mut()
            .find(|i| i.key() == key)
            .ok_or_else(|| DbError::NotFound(format!("instance {key}")))
    }
}
