//! Single-file block store for the Tome directory database.
//!
//! A [`BlockStore`] maps numeric [`BlockId`]s onto byte regions of one
//! backing file. It owns the block table, hands out ids (reusing freed ones
//! lowest-first), and persists its table of contents (TOC) so a reopened
//! store sees exactly the blocks that were committed.
//!
//! # File Layout
//!
//! ```text
//! [0..64)     header slot A
//! [64..128)   header slot B
//! [128..)     block regions and TOC regions, append-only
//! ```
//!
//! Each header slot names one TOC region by offset, length and CRC32, and
//! carries a generation number. A flush writes the new TOC to a region no
//! live header points at, syncs it, and only then overwrites the older of
//! the two header slots. Opening picks the highest generation whose TOC
//! validates, so a torn flush falls back to the previous commit.
//!
//! # Design Rules
//!
//! 1. Block id 1 is allocated first and holds the caller's root metadata.
//! 2. Block data is never overwritten in place; a rewrite appends a new region.
//! 3. The TOC is built completely in memory before the durable write point.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod block;
pub mod config;
pub mod error;
mod header;
pub mod reader;
pub mod store;
mod toc;
pub mod writer;

pub use block::{Block, Extent};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use reader::BlockReader;
pub use store::{BlockStore, StoreStats};
pub use tome_types::BlockId;
pub use writer::BlockWriter;
