//! Error types for the registry crate.

use crate::entry::{BlockKey, GroupKey, InstanceKey};

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("group entry not found: {0}")]
    GroupNotFound(GroupKey),

    #[error("instance entry not found: {0}")]
    InstanceNotFound(InstanceKey),

    #[error("block entry not found: {0}")]
    BlockEntryNotFound(BlockKey),

    /// The root group can only be set once.
    #[error("root group already set")]
    RootAlreadySet,

    #[error("registry has no root group")]
    NoRoot,

    #[error("the root group cannot be removed")]
    CannotRemoveRoot,

    /// The entry still has children or owns blocks.
    #[error("entry is not empty: {0}")]
    NotEmpty(String),

    /// The entry already has a parent or owner.
    #[error("entry already attached: {0}")]
    AlreadyAttached(String),

    /// Attaching would make a group its own ancestor.
    #[error("attaching {child} under {parent} would create a cycle")]
    Cycle { parent: GroupKey, child: GroupKey },

    /// The instance already has an object block.
    #[error("instance {0} already has an object block")]
    ObjectSlotOccupied(InstanceKey),

    #[error("instance {instance} already has a data stream named {name:?}")]
    DuplicateDataName { instance: InstanceKey, name: String },

    /// Decoded registry is structurally inconsistent.
    #[error("corrupt registry: {0}")]
    Corrupt(String),

    #[error("codec error: {0}")]
    Codec(#[from] tome_codec::CodecError),
}

/// Convenience alias for registry results.
pub type RegistryResult<T> = Result<T, RegistryError>;
