//! Wire types for chunked uploads.
//!
//! Shared between the upload client (job registry, scheduler) and the
//! storage server (chunk receiver, reassembler). Everything here is plain
//! data with `serde` derives; field names are camelCase on the wire.

pub mod messages;
pub mod types;

pub use messages::{AckStatus, ChunkUploadRequest, ErrorResponse, UploadAck};
pub use types::{JobStatus, NetworkClass, RejectReason, UploadSnapshot};
