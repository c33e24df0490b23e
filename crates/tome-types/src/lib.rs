//! Foundation types for the Tome directory database.
//!
//! Every other Tome crate depends on `tome-types`.
//!
//! # Key Types
//!
//! - [`BlockId`]: Numeric address of a block inside a store file
//! - [`Guid`]: Stable identity of an instance, independent of its name
//! - [`ContentHash`]: BLAKE3 digest used for the registry dirty check
//! - [`ContentHasher`]: Domain-separated hasher producing [`ContentHash`]es

pub mod block;
pub mod error;
pub mod guid;
pub mod hash;

pub use block::BlockId;
pub use error::TypeError;
pub use guid::Guid;
pub use hash::{ContentHash, ContentHasher};
