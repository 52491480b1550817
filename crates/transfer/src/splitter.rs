use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// A chunk read from a source file.
#[derive(Debug, Clone)]
pub struct FileChunk {
    /// Zero-based index of this chunk within the file.
    pub index: u32,
    /// Raw chunk data; `chunk_size` bytes except possibly the last chunk.
    pub data: Vec<u8>,
}

/// Number of chunks a file of `size` bytes occupies at the given chunk size.
///
/// Empty files occupy one zero-length chunk so every upload has a final
/// chunk to finalize on.
pub fn chunk_count(size: u64, chunk_size: usize) -> u32 {
    if size == 0 {
        return 1;
    }
    size.div_ceil(chunk_size as u64) as u32
}

/// Reads a file sequentially in fixed-size chunks.
pub struct ChunkSplitter {
    file: File,
    chunk_size: usize,
    file_size: u64,
    offset: u64,
    next_index: u32,
    total_chunks: u32,
}

impl ChunkSplitter {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub fn new(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            file_size,
            offset: 0,
            next_index: 0,
            total_chunks: chunk_count(file_size, chunk_size),
        })
    }

    /// Reads the next chunk. Returns `None` once every chunk was produced.
    pub fn next_chunk(&mut self) -> Result<Option<FileChunk>, TransferError> {
        if self.next_index >= self.total_chunks {
            return Ok(None);
        }

        let remaining = self.file_size - self.offset;
        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; read_size];
        self.file.read_exact(&mut buf)?;

        let chunk = FileChunk {
            index: self.next_index,
            data: buf,
        };
        self.offset += read_size as u64;
        self.next_index += 1;
        Ok(Some(chunk))
    }

    /// Total number of chunks this file splits into.
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size - self.offset
    }
}
