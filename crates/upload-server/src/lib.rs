//! Receiving side of chunked uploads.
//!
//! A [`ChunkReceiver`] validates each chunk against the caller's root,
//! stages it under [`STAGING_DIR`] and hands complete sets of parts to the
//! [`Reassembler`]. Final files live at `storage_root/{callerId}/{path}`.

pub mod assembler;
pub mod config;
pub mod error;
pub mod receiver;
pub mod staging;
pub mod usage;

pub use assembler::{Assembly, Reassembler};
pub use config::StorageConfig;
pub use error::{AssembleError, ReceiveError, UsageError};
pub use receiver::ChunkReceiver;
pub use staging::{PartKey, STAGING_DIR, StagingArea};
pub use usage::UsageWalker;
