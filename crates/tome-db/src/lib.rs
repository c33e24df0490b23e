//! Embedded directory database stored in a single Tome file.
//!
//! A [`Database`] exposes a tree of [`Group`]s holding [`Instance`]s. Each
//! instance carries one typed primary object and any number of named binary
//! data streams. Everything lives in one block store file; the directory
//! itself is a [`Registry`](tome_registry::Registry) persisted in block 1.
//!
//! Nodes are cheap handles. Every operation takes a [`DirectoryContext`],
//! which borrows the store and registry for the duration of the call.
//!
//! ```no_run
//! use tome_db::{Database, DatabaseConfig};
//! use tome_db::Guid;
//!
//! # fn main() -> tome_db::DbResult<()> {
//! let mut db = Database::create("photos.tome".as_ref(), DatabaseConfig::default())?;
//! let (root, mut ctx) = db.directory();
//! let album = root.create_group(&mut ctx, "Foo")?;
//! let photo = album.create_instance(&mut ctx, "ABC", Guid::new_random())?;
//! photo.set_object(&mut ctx, &"caption".to_string())?;
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod check;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod group;
pub mod instance;

pub use check::CheckReport;
pub use config::DatabaseConfig;
pub use context::DirectoryContext;
pub use database::{Database, DatabaseStats};
pub use error::{DbError, DbResult};
pub use group::Group;
pub use instance::Instance;

// Re-export key types
pub use tome_codec::CodecKind;
pub use tome_store::{BlockReader, BlockWriter, StoreStats};
pub use tome_types::{BlockId, Guid};
