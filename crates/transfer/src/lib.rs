//! Chunk planning and byte-level transfer helpers.
//!
//! Splits files into chunk descriptors, reads chunk byte ranges lazily,
//! checksums them, and reassembles them on the receiving side.

mod chunked;
mod plan;
mod progress;
mod validation;

pub use chunked::{ChunkData, ChunkWriter, checksum_bytes, read_range};
pub use plan::{ChunkSpec, plan_chunks};
pub use progress::SpeedCalculator;
pub use validation::resolve_target_path;

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),

    #[error("range {offset}+{length} exceeds file size {file_size}")]
    RangeOutOfBounds {
        offset: u64,
        length: u64,
        file_size: u64,
    },
}
