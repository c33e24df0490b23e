//! Directory registry for the Tome database.
//!
//! The [`Registry`] is the single serializable object stored in block 1 of
//! every Tome file. It records the group tree, the instances hanging off it,
//! and which block ids each instance owns. All entries live in key-addressed
//! arenas; links between them are keys, never pointers.
//!
//! The registry never touches the block store. Callers free block ids first
//! and detach the matching entries afterwards.
//!
//! # Key Types
//!
//! - [`Registry`] -- Arena of entries plus the root key
//! - [`GroupEntry`], [`InstanceEntry`], [`BlockEntry`] -- Persisted entries
//! - [`GroupKey`], [`InstanceKey`], [`BlockKey`] -- Never-reused arena keys

pub mod entry;
pub mod error;
pub mod registry;

pub use entry::{BlockEntry, BlockKey, GroupEntry, GroupKey, InstanceEntry, InstanceKey};
pub use error::{RegistryError, RegistryResult};
pub use registry::{Registry, Unreachable, REGISTRY_VERSION};
