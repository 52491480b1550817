//! Chunked file transfer: client-side splitting and server-side assembly.

mod assembly;
mod reaper;
mod splitter;
mod validation;

pub use assembly::{AssemblyStore, ChunkOutcome};
pub use reaper::Reaper;
pub use splitter::{ChunkSplitter, FileChunk, chunk_count};
pub use validation::validate_file_name;

/// Default chunk size: 1 MiB, matching the size the server advertises.
pub const DEFAULT_CHUNK_SIZE: usize = reelport_protocol::constants::CHUNK_SIZE;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("invalid file size: {0}")]
    InvalidSize(i64),

    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: i64, limit: i64 },

    #[error("chunk of {len} bytes exceeds chunk size {max}")]
    OversizedChunk { len: usize, max: usize },

    #[error("unknown upload: {0}")]
    UnknownUpload(String),

    #[error("chunk {got} out of order (expected {expected})")]
    OutOfOrderChunk { expected: u32, got: u32 },

    #[error("chunk does not match upload: {0}")]
    ChunkMismatch(String),
}
