//! Object codecs for the Tome directory database.
//!
//! The engine never interprets stored objects itself. Anything that crosses
//! the block boundary goes through a [`Codec`]: the registry is always
//! encoded with [`BincodeCodec`], and instance objects use whichever
//! [`CodecKind`] the database was created with.

pub mod codec;
pub mod error;

pub use codec::{BincodeCodec, Codec, CodecKind, JsonCodec};
pub use error::{CodecError, CodecResult};
