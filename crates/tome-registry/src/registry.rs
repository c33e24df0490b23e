//! The in-memory registry and its persisted form.
//!
//! Entries live in three `BTreeMap` arenas keyed by never-reused `u64`
//! keys. Ordered maps keep the encoding deterministic, so two registries
//! with the same content always hash the same.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tome_codec::{BincodeCodec, Codec, CodecKind};
use tome_types::{BlockId, ContentHash, ContentHasher, Guid};
use tracing::debug;

use crate::entry::{BlockEntry, BlockKey, GroupEntry, GroupKey, InstanceEntry, InstanceKey};
use crate::error::{RegistryError, RegistryResult};

/// Version of the persisted registry layout.
pub const REGISTRY_VERSION: u32 = 1;

/// Entries not reachable from the root group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Unreachable {
    pub groups: Vec<GroupKey>,
    pub instances: Vec<InstanceKey>,
    pub blocks: Vec<BlockKey>,
}

impl Unreachable {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.instances.is_empty() && self.blocks.is_empty()
    }
}

/// The directory of a Tome file: group tree, instances and block ownership.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    version: u32,
    object_codec: CodecKind,
    next_key: u64,
    root: Option<GroupKey>,
    groups: BTreeMap<GroupKey, GroupEntry>,
    instances: BTreeMap<InstanceKey, InstanceEntry>,
    blocks: BTreeMap<BlockKey, BlockEntry>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("version", &self.version)
            .field("object_codec", &self.object_codec)
            .field("root", &self.root)
            .field("groups", &self.groups.len())
            .field("instances", &self.instances.len())
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(CodecKind::default())
    }
}

impl Registry {
    /// Create an empty registry with no root. Instance objects will be
    /// encoded with `object_codec`.
    pub fn new(object_codec: CodecKind) -> Self {
        Self {
            version: REGISTRY_VERSION,
            object_codec,
            next_key: 1,
            root: None,
            groups: BTreeMap::new(),
            instances: BTreeMap::new(),
            blocks: BTreeMap::new(),
        }
    }

    /// Create an empty registry whose root group is named `root_name`.
    pub fn with_root(object_codec: CodecKind, root_name: impl Into<String>) -> Self {
        let mut registry = Self::new(object_codec);
        let root = registry.create_group_entry(root_name);
        registry.root = Some(root);
        registry
    }

    /// Codec used for instance objects.
    pub fn object_codec(&self) -> CodecKind {
        self.object_codec
    }

    fn issue_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    // ---------------------------------------------------------------
    // Entry creation
    // ---------------------------------------------------------------

    /// Create a detached group entry.
    pub fn create_group_entry(&mut self, name: impl Into<String>) -> GroupKey {
        let key = GroupKey(self.issue_key());
        self.groups.insert(key, GroupEntry::new(name.into()));
        key
    }

    /// Create a detached instance entry.
    pub fn create_instance_entry(&mut self, name: impl Into<String>, guid: Guid) -> InstanceKey {
        let key = InstanceKey(self.issue_key());
        self.instances
            .insert(key, InstanceEntry::new(name.into(), guid));
        key
    }

    /// Create an unowned block entry for an already-allocated block id.
    pub fn create_block_entry(&mut self, block_id: BlockId) -> BlockKey {
        let key = BlockKey(self.issue_key());
        self.blocks.insert(key, BlockEntry::new(block_id));
        key
    }

    // ---------------------------------------------------------------
    // Linking
    // ---------------------------------------------------------------

    /// Append a detached group to `parent`'s child groups.
    pub fn attach_group(&mut self, parent: GroupKey, child: GroupKey) -> RegistryResult<()> {
        self.group(parent)?;
        let entry = self.group(child)?;
        if entry.parent.is_some() || self.root == Some(child) {
            return Err(RegistryError::AlreadyAttached(child.to_string()));
        }
        if self.ancestors(parent).any(|g| g == child) {
            return Err(RegistryError::Cycle { parent, child });
        }
        self.group_mut(child)?.parent = Some(parent);
        self.group_mut(parent)?.child_groups.push(child);
        Ok(())
    }

    /// Append a detached instance to `parent`'s child instances.
    pub fn attach_instance(
        &mut self,
        parent: GroupKey,
        instance: InstanceKey,
    ) -> RegistryResult<()> {
        self.group(parent)?;
        if self.instance(instance)?.parent.is_some() {
            return Err(RegistryError::AlreadyAttached(instance.to_string()));
        }
        self.instance_mut(instance)?.parent = Some(parent);
        self.group_mut(parent)?.child_instances.push(instance);
        Ok(())
    }

    /// Make `block` the instance's primary object block.
    pub fn attach_object_block(
        &mut self,
        instance: InstanceKey,
        block: BlockKey,
    ) -> RegistryResult<()> {
        if self.instance(instance)?.object_block.is_some() {
            return Err(RegistryError::ObjectSlotOccupied(instance));
        }
        self.claim_block(block, instance)?;
        self.instance_mut(instance)?.object_block = Some(block);
        Ok(())
    }

    /// Record `block` as the instance's data stream called `name`.
    pub fn attach_data_block(
        &mut self,
        instance: InstanceKey,
        name: impl Into<String>,
        block: BlockKey,
    ) -> RegistryResult<()> {
        let name = name.into();
        if self.instance(instance)?.data_blocks.contains_key(&name) {
            return Err(RegistryError::DuplicateDataName { instance, name });
        }
        self.claim_block(block, instance)?;
        self.instance_mut(instance)?.data_blocks.insert(name, block);
        Ok(())
    }

    fn claim_block(&mut self, block: BlockKey, owner: InstanceKey) -> RegistryResult<()> {
        let entry = self.block_entry_mut(block)?;
        if entry.owner.is_some() {
            return Err(RegistryError::AlreadyAttached(block.to_string()));
        }
        entry.owner = Some(owner);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Root
    // ---------------------------------------------------------------

    /// Designate a detached group as the root. Allowed once.
    pub fn set_root_group(&mut self, key: GroupKey) -> RegistryResult<()> {
        if self.root.is_some() {
            return Err(RegistryError::RootAlreadySet);
        }
        if self.group(key)?.parent.is_some() {
            return Err(RegistryError::AlreadyAttached(key.to_string()));
        }
        self.root = Some(key);
        Ok(())
    }

    pub fn root_key(&self) -> Option<GroupKey> {
        self.root
    }

    pub fn root_group(&self) -> RegistryResult<&GroupEntry> {
        let key = self.root.ok_or(RegistryError::NoRoot)?;
        self.group(key)
    }

    // ---------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------

    pub fn group(&self, key: GroupKey) -> RegistryResult<&GroupEntry> {
        self.groups.get(&key).ok_or(RegistryError::GroupNotFound(key))
    }

    pub fn group_mut(&mut self, key: GroupKey) -> RegistryResult<&mut GroupEntry> {
        self.groups
            .get_mut(&key)
            .ok_or(RegistryError::GroupNotFound(key))
    }

    pub fn instance(&self, key: InstanceKey) -> RegistryResult<&InstanceEntry> {
        self.instances
            .get(&key)
            .ok_or(RegistryError::InstanceNotFound(key))
    }

    pub fn instance_mut(&mut self, key: InstanceKey) -> RegistryResult<&mut InstanceEntry> {
        self.instances
            .get_mut(&key)
            .ok_or(RegistryError::InstanceNotFound(key))
    }

    pub fn block_entry(&self, key: BlockKey) -> RegistryResult<&BlockEntry> {
        self.blocks
            .get(&key)
            .ok_or(RegistryError::BlockEntryNotFound(key))
    }

    fn block_entry_mut(&mut self, key: BlockKey) -> RegistryResult<&mut BlockEntry> {
        self.blocks
            .get_mut(&key)
            .ok_or(RegistryError::BlockEntryNotFound(key))
    }

    pub fn contains_group(&self, key: GroupKey) -> bool {
        self.groups.contains_key(&key)
    }

    pub fn contains_instance(&self, key: InstanceKey) -> bool {
        self.instances.contains_key(&key)
    }

    /// First child group of `parent` called `name`.
    pub fn child_group_named(&self, parent: GroupKey, name: &str) -> RegistryResult<Option<GroupKey>> {
        let entry = self.group(parent)?;
        Ok(entry
            .child_groups
            .iter()
            .copied()
            .find(|k| self.groups.get(k).is_some_and(|g| g.name == name)))
    }

    /// First child instance of `parent` called `name`.
    pub fn child_instance_named(
        &self,
        parent: GroupKey,
        name: &str,
    ) -> RegistryResult<Option<InstanceKey>> {
        let entry = self.group(parent)?;
        Ok(entry
            .child_instances
            .iter()
            .copied()
            .find(|k| self.instances.get(k).is_some_and(|i| i.name == name)))
    }

    /// Groups and instances under `key`, the group itself included.
    /// Groups come deepest first, so removing them in order never hits a
    /// non-empty group.
    pub fn subtree(&self, key: GroupKey) -> RegistryResult<(Vec<GroupKey>, Vec<InstanceKey>)> {
        let mut groups = Vec::new();
        let mut instances = Vec::new();
        let mut stack = vec![(key, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                groups.push(current);
                continue;
            }
            let entry = self.group(current)?;
            instances.extend_from_slice(&entry.child_instances);
            stack.push((current, true));
            for child in entry.child_groups.iter().rev() {
                stack.push((*child, false));
            }
        }
        Ok((groups, instances))
    }

    fn ancestors(&self, key: GroupKey) -> impl Iterator<Item = GroupKey> + '_ {
        let mut next = Some(key);
        let mut steps = 0usize;
        std::iter::from_fn(move || {
            let current = next?;
            steps += 1;
            if steps > self.groups.len() {
                return None;
            }
            next = self.groups.get(&current).and_then(|g| g.parent);
            Some(current)
        })
    }

    // ---------------------------------------------------------------
    // Removal
    // ---------------------------------------------------------------

    /// Detach a block entry from its owner and drop it. The block id
    /// itself is not released.
    pub fn remove_block(&mut self, key: BlockKey) -> RegistryResult<BlockEntry> {
        let entry = self
            .blocks
            .remove(&key)
            .ok_or(RegistryError::BlockEntryNotFound(key))?;
        if let Some(owner) = entry.owner {
            if let Some(instance) = self.instances.get_mut(&owner) {
                if instance.object_block == Some(key) {
                    instance.object_block = None;
                }
                instance.data_blocks.retain(|_, block| *block != key);
            }
        }
        debug!(entry = %key, block = %entry.block_id, "removed block entry");
        Ok(entry)
    }

    /// Detach an instance from its parent and drop it. Fails while the
    /// instance still owns blocks.
    pub fn remove_instance(&mut self, key: InstanceKey) -> RegistryResult<InstanceEntry> {
        let entry = self.instance(key)?;
        if entry.owns_blocks() {
            return Err(RegistryError::NotEmpty(format!(
                "instance {key} ({}) still owns blocks",
                entry.name
            )));
        }
        let entry = self
            .instances
            .remove(&key)
            .ok_or(RegistryError::InstanceNotFound(key))?;
        if let Some(parent) = entry.parent {
            if let Some(group) = self.groups.get_mut(&parent) {
                group.child_instances.retain(|k| *k != key);
            }
        }
        debug!(entry = %key, name = %entry.name, "removed instance entry");
        Ok(entry)
    }

    /// Detach an empty, non-root group from its parent and drop it.
    pub fn remove_group(&mut self, key: GroupKey) -> RegistryResult<GroupEntry> {
        if self.root == Some(key) {
            return Err(RegistryError::CannotRemoveRoot);
        }
        let entry = self.group(key)?;
        if !entry.is_empty() {
            return Err(RegistryError::NotEmpty(format!(
                "group {key} ({}) still has children",
                entry.name
            )));
        }
        let entry = self
            .groups
            .remove(&key)
            .ok_or(RegistryError::GroupNotFound(key))?;
        if let Some(parent) = entry.parent {
            if let Some(group) = self.groups.get_mut(&parent) {
                group.child_groups.retain(|k| *k != key);
            }
        }
        debug!(entry = %key, name = %entry.name, "removed group entry");
        Ok(entry)
    }

    // ---------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------

    /// Serialize the whole registry with bincode.
    pub fn encode(&self) -> RegistryResult<Vec<u8>> {
        Ok(BincodeCodec.encode(self)?)
    }

    /// Deserialize and validate a registry.
    pub fn decode(bytes: &[u8]) -> RegistryResult<Self> {
        let registry: Self = BincodeCodec.decode(bytes)?;
        registry.validate()?;
        Ok(registry)
    }

    /// BLAKE3 hash of the encoded registry.
    pub fn content_hash(&self) -> RegistryResult<ContentHash> {
        Ok(ContentHasher::REGISTRY.hash(&self.encode()?))
    }

    /// Every block id some block entry references.
    pub fn referenced_blocks(&self) -> BTreeSet<BlockId> {
        self.blocks.values().map(|b| b.block_id).collect()
    }

    /// All block entries, ascending by key.
    pub fn block_entries(&self) -> impl Iterator<Item = (BlockKey, &BlockEntry)> + '_ {
        self.blocks.iter().map(|(k, e)| (*k, e))
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn block_entry_count(&self) -> usize {
        self.blocks.len()
    }

    /// Entries that exist in the arenas but cannot be reached from the root.
    pub fn unreachable(&self) -> Unreachable {
        let mut reachable_groups = BTreeSet::new();
        let mut reachable_instances = BTreeSet::new();
        if let Some(root) = self.root {
            if let Ok((groups, instances)) = self.subtree(root) {
                reachable_groups.extend(groups);
                reachable_instances.extend(instances);
            }
        }
        let reachable_blocks: BTreeSet<BlockKey> = reachable_instances
            .iter()
            .filter_map(|k| self.instances.get(k))
            .flat_map(|i| i.owned_blocks())
            .collect();

        Unreachable {
            groups: self
                .groups
                .keys()
                .filter(|k| !reachable_groups.contains(*k))
                .copied()
                .collect(),
            instances: self
                .instances
                .keys()
                .filter(|k| !reachable_instances.contains(*k))
                .copied()
                .collect(),
            blocks: self
                .blocks
                .keys()
                .filter(|k| !reachable_blocks.contains(*k))
                .copied()
                .collect(),
        }
    }

    /// Check that every link is mirrored, keys are in range, and no two
    /// block entries share a block id.
    pub fn validate(&self) -> RegistryResult<()> {
        let corrupt = |reason: String| Err(RegistryError::Corrupt(reason));

        if self.version != REGISTRY_VERSION {
            return corrupt(format!("unsupported registry version {}", self.version));
        }
        let root = match self.root {
            Some(root) => root,
            None => return corrupt("no root group".into()),
        };
        match self.groups.get(&root) {
            Some(entry) if entry.parent.is_none() => {}
            Some(_) => return corrupt(format!("root group {root} has a parent")),
            None => return corrupt(format!("root group {root} missing")),
        }

        let max_key = self
            .groups
            .keys()
            .map(|k| k.0)
            .chain(self.instances.keys().map(|k| k.0))
            .chain(self.blocks.keys().map(|k| k.0))
            .max()
            .unwrap_or(0);
        if max_key >= self.next_key {
            return corrupt(format!("key {max_key} at or beyond next key {}", self.next_key));
        }

        for (key, group) in &self.groups {
            if let Some(parent) = group.parent {
                let listed = self
                    .groups
                    .get(&parent)
                    .is_some_and(|p| p.child_groups.contains(key));
                if !listed {
                    return corrupt(format!("group {key} not listed by parent {parent}"));
                }
            }
            let mut seen = BTreeSet::new();
            for child in &group.child_groups {
                if !seen.insert(*child) {
                    return corrupt(format!("group {child} listed twice under {key}"));
                }
                if self.groups.get(child).and_then(|c| c.parent) != Some(*key) {
                    return corrupt(format!("child group {child} of {key} has another parent"));
                }
            }
            let mut seen = BTreeSet::new();
            for child in &group.child_instances {
                if !seen.insert(*child) {
                    return corrupt(format!("instance {child} listed twice under {key}"));
                }
                if self.instances.get(child).and_then(|c| c.parent) != Some(*key) {
                    return corrupt(format!("child instance {child} of {key} has another parent"));
                }
            }
            if self.ancestors(*key).last().and_then(|top| self.groups.get(&top)?.parent).is_some()
            {
                return corrupt(format!("group {key} is part of a cycle"));
            }
        }

        for (key, instance) in &self.instances {
            if let Some(parent) = instance.parent {
                let listed = self
                    .groups
                    .get(&parent)
                    .is_some_and(|p| p.child_instances.contains(key));
                if !listed {
                    return corrupt(format!("instance {key} not listed by parent {parent}"));
                }
            }
            for block in instance.owned_blocks() {
                if self.blocks.get(&block).and_then(|b| b.owner) != Some(*key) {
                    return corrupt(format!("block entry {block} of {key} has another owner"));
                }
            }
        }

        let mut ids = BTreeSet::new();
        for (key, block) in &self.blocks {
            if block.block_id.is_registry() {
                return corrupt(format!("block entry {key} references the registry block"));
            }
            if !ids.insert(block.block_id) {
                return corrupt(format!("block {} referenced twice", block.block_id));
            }
            if let Some(owner) = block.owner {
                let owned = self
                    .instances
                    .get(&owner)
                    .is_some_and(|i| i.owned_blocks().any(|b| b == *key));
                if !owned {
                    return corrupt(format!("block entry {key} not held by owner {owner}"));
                }
            }
        }
        Ok(())
    }
}
