//! Per-file upload bookkeeping.

use std::path::PathBuf;

/// A file queued for upload and its transfer state.
///
/// Completed tasks stay in the driver's list for display; `final_name`
/// marks them done.
#[derive(Debug, Clone)]
pub struct UploadTask {
    /// Source file on disk.
    pub path: PathBuf,
    /// Name sent to the server (the file's base name).
    pub file_name: String,
    /// Size in bytes at enqueue time.
    pub size: u64,
    /// Chunk count at the negotiated chunk size.
    pub total_chunks: u32,
    /// Chunk currently in flight, if the task is active.
    pub current_chunk: Option<u32>,
    /// Server-assigned name, set on completion.
    pub final_name: Option<String>,
    /// Failure message, set when the driver halted on this task.
    pub error: Option<String>,
}

impl UploadTask {
    /// Progress in `[0.0, 1.0]`: acknowledged chunks over total chunks,
    /// 1.0 once the final name is recorded.
    pub fn progress(&self) -> f64 {
        if self.final_name.is_some() {
            return 1.0;
        }
        match self.current_chunk {
            Some(chunk) => f64::from(chunk) / f64::from(self.total_chunks),
            None => 0.0,
        }
    }

    /// `true` once the upload completed and the final name is known.
    pub fn is_complete(&self) -> bool {
        self.final_name.is_some()
    }
}
