//! Server-side chunk assembly: temp-file accumulation and finalization.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reelport_protocol::constants::{MAX_FILE_SIZE, TMP_PREFIX};

use crate::splitter::chunk_count;
use crate::{DEFAULT_CHUNK_SIZE, TransferError, validate_file_name};

/// Outcome of accepting one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// More chunks to come.
    Continue {
        bytes_written: i64,
        total_written: i64,
    },
    /// Last chunk received; the assembly was promoted to its final name.
    Done {
        final_name: String,
        total_written: i64,
    },
}

/// In-memory state of one open upload.
struct Assembly {
    file_name: String,
    ext: String,
    total_chunks: u32,
    next_chunk: u32,
    written: i64,
    updated_at: Instant,
}

/// Accumulates uploaded chunks into temp files and promotes them to
/// server-assigned final names on the last chunk.
///
/// One entry per open upload, keyed by the random token issued by
/// [`open`](Self::open). The store mutex makes the expected-index check
/// and its append atomic, so a duplicate or racing chunk request cannot
/// interleave appends on the same assembly.
pub struct AssemblyStore {
    uploads_dir: PathBuf,
    chunk_size: usize,
    inner: Mutex<HashMap<String, Assembly>>,
}

impl AssemblyStore {
    /// Creates a store rooted at `uploads_dir`, creating the directory.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub fn new(uploads_dir: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        fs::create_dir_all(uploads_dir)?;
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            uploads_dir: uploads_dir.to_path_buf(),
            chunk_size,
            inner: Mutex::new(HashMap::new()),
        })
    }

    /// The chunk size this store expects for non-final chunks.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Directory where temp and finalized files live.
    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Opens a new upload and returns its assembly key.
    ///
    /// The file name and declared size are validated before any disk
    /// write; the temp file itself is only created when the first chunk
    /// arrives.
    pub fn open(&self, file_name: &str, size: i64) -> Result<String, TransferError> {
        let ext = validate_file_name(file_name)?;
        if size < 0 {
            return Err(TransferError::InvalidSize(size));
        }
        if size > MAX_FILE_SIZE {
            return Err(TransferError::FileTooLarge {
                size,
                limit: MAX_FILE_SIZE,
            });
        }

        let upload_id = uuid::Uuid::new_v4().to_string();
        let assembly = Assembly {
            file_name: file_name.to_string(),
            ext,
            total_chunks: chunk_count(size as u64, self.chunk_size),
            next_chunk: 0,
            written: 0,
            updated_at: Instant::now(),
        };
        self.inner
            .lock()
            .unwrap()
            .insert(upload_id.clone(), assembly);

        tracing::info!(%upload_id, file_name, size, "upload opened");
        Ok(upload_id)
    }

    /// Appends one chunk to its assembly.
    ///
    /// Chunk 0 resets an existing temp file (an abandoned earlier attempt
    /// is discarded, not appended after). Any other index must be the
    /// next expected one. The last chunk renames the temp file to its
    /// final name and drops the in-memory entry.
    pub fn accept_chunk(
        &self,
        upload_id: &str,
        file_name: &str,
        chunk_index: u32,
        total_chunks: u32,
        payload: &[u8],
    ) -> Result<ChunkOutcome, TransferError> {
        let mut inner = self.inner.lock().unwrap();
        let assembly = inner
            .get_mut(upload_id)
            .ok_or_else(|| TransferError::UnknownUpload(upload_id.to_string()))?;

        if file_name != assembly.file_name {
            return Err(TransferError::ChunkMismatch(format!(
                "file name {file_name:?} does not match the opened upload"
            )));
        }
        if total_chunks != assembly.total_chunks {
            return Err(TransferError::ChunkMismatch(format!(
                "declared {total_chunks} chunks, upload was opened with {}",
                assembly.total_chunks
            )));
        }
        if chunk_index >= total_chunks {
            return Err(TransferError::ChunkMismatch(format!(
                "chunk index {chunk_index} out of range (total {total_chunks})"
            )));
        }
        if payload.len() > self.chunk_size {
            return Err(TransferError::OversizedChunk {
                len: payload.len(),
                max: self.chunk_size,
            });
        }

        let tmp_path = self.tmp_path(upload_id, &assembly.ext);

        if chunk_index == 0 {
            // A fresh chunk 0 discards any prior attempt instead of
            // appending after it.
            if tmp_path.exists() {
                fs::remove_file(&tmp_path)?;
                tracing::warn!(%upload_id, "discarded abandoned assembly on chunk 0");
            }
            assembly.next_chunk = 0;
            assembly.written = 0;
        } else if chunk_index != assembly.next_chunk {
            return Err(TransferError::OutOfOrderChunk {
                expected: assembly.next_chunk,
                got: chunk_index,
            });
        }

        if assembly.written + payload.len() as i64 > MAX_FILE_SIZE {
            return Err(TransferError::FileTooLarge {
                size: assembly.written + payload.len() as i64,
                limit: MAX_FILE_SIZE,
            });
        }

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&tmp_path)?;
        file.write_all(payload)?;

        assembly.next_chunk = chunk_index + 1;
        assembly.written += payload.len() as i64;
        assembly.updated_at = Instant::now();

        if chunk_index == total_chunks - 1 {
            let final_name = format!("{}.{}", uuid::Uuid::new_v4().simple(), assembly.ext);
            fs::rename(&tmp_path, self.uploads_dir.join(&final_name))?;
            let total_written = assembly.written;
            inner.remove(upload_id);

            tracing::info!(%upload_id, final_name = %final_name, bytes = total_written, "upload finalized");
            Ok(ChunkOutcome::Done {
                final_name,
                total_written,
            })
        } else {
            Ok(ChunkOutcome::Continue {
                bytes_written: payload.len() as i64,
                total_written: assembly.written,
            })
        }
    }

    /// Removes assemblies idle longer than `max_age`, along with their
    /// temp files. Returns the number of assemblies removed.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let expired: Vec<String> = inner
            .iter()
            .filter(|(_, a)| a.updated_at.elapsed() > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        for upload_id in &expired {
            if let Some(assembly) = inner.remove(upload_id) {
                let tmp_path = self.tmp_path(upload_id, &assembly.ext);
                if tmp_path.exists() {
                    if let Err(e) = fs::remove_file(&tmp_path) {
                        tracing::warn!(%upload_id, "failed to remove stale temp file: {e}");
                    }
                }
                tracing::warn!(%upload_id, file_name = %assembly.file_name, "swept stale assembly");
            }
        }
        expired.len()
    }

    /// Number of uploads currently in progress.
    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    fn tmp_path(&self, upload_id: &str, ext: &str) -> PathBuf {
        self.uploads_dir
            .join(format!("{TMP_PREFIX}{upload_id}.{ext}"))
    }
}
