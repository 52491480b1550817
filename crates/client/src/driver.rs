//! Upload driver: sequences one chunk at a time across queued files.
//!
//! `ServerConnection` is the transport seam; [`crate::WsClient`]
//! implements it for real sockets and tests use mocks.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use reelport_protocol::constants::{MAX_FILE_SIZE, MessageType};
use reelport_protocol::envelope::Message;
use reelport_protocol::messages::{
    UploadChunkRequest, UploadChunkResponse, UploadOpenRequest, UploadOpenResponse,
};
use reelport_transfer::{
    ChunkSplitter, DEFAULT_CHUNK_SIZE, TransferError, chunk_count, validate_file_name,
};
use tracing::debug;

use crate::error::ClientError;
use crate::task::UploadTask;
use crate::ws_client::WsClient;

/// Abstract connection to an upload server.
///
/// A trait keeps the driver decoupled from the socket and testable with
/// mock connections.
pub trait ServerConnection: Send + Sync {
    /// Sends a JSON request and waits for the response.
    fn send_request(
        &self,
        msg_type: MessageType,
        payload: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<Message, ClientError>> + Send + '_>>;
}

impl ServerConnection for WsClient {
    fn send_request(
        &self,
        msg_type: MessageType,
        payload: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<Message, ClientError>> + Send + '_>> {
        let payload = payload.clone();
        Box::pin(async move { WsClient::send_request(self, msg_type, Some(&payload)).await })
    }
}

/// Drives chunked uploads one file and one chunk at a time.
///
/// The driver is an explicit state machine over (current file, current
/// chunk, last uploaded watermark). Exactly one chunk is ever in flight;
/// state advances only when a transfer result is observed. A failure
/// halts the driver on the failing chunk, and the file must be re-added
/// to try again from chunk 0.
pub struct UploadDriver {
    tasks: Vec<UploadTask>,
    current_file: Option<usize>,
    last_uploaded: Option<usize>,
    chunk_size: usize,
}

impl UploadDriver {
    /// Creates a driver.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used; the
    /// server may still dictate a different size at open time.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            tasks: Vec::new(),
            current_file: None,
            last_uploaded: None,
            chunk_size: if chunk_size == 0 {
                DEFAULT_CHUNK_SIZE
            } else {
                chunk_size
            },
        }
    }

    /// Queues a file for upload and returns its task index.
    ///
    /// The name and size checks mirror the server's, so obviously
    /// rejected files never reach the wire.
    pub fn add_file(&mut self, path: &Path) -> Result<usize, ClientError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ClientError::Transfer(TransferError::InvalidName(path.display().to_string()))
            })?
            .to_string();
        validate_file_name(&file_name)?;

        let size = std::fs::metadata(path)?.len();
        if size as i64 > MAX_FILE_SIZE {
            return Err(ClientError::Transfer(TransferError::FileTooLarge {
                size: size as i64,
                limit: MAX_FILE_SIZE,
            }));
        }

        self.tasks.push(UploadTask {
            path: path.to_path_buf(),
            file_name,
            size,
            total_chunks: chunk_count(size, self.chunk_size),
            current_chunk: None,
            final_name: None,
            error: None,
        });
        Ok(self.tasks.len() - 1)
    }

    /// All queued tasks, completed and failed ones included.
    pub fn tasks(&self) -> &[UploadTask] {
        &self.tasks
    }

    /// Index of the most recently completed file.
    pub fn last_uploaded(&self) -> Option<usize> {
        self.last_uploaded
    }

    /// Uploads every pending file, one chunk at a time.
    ///
    /// Stops at the first failure, leaving the failing task marked with
    /// the error and its in-flight chunk; completed files keep their
    /// final names. Failed tasks are not retried on a later `run`, the
    /// file has to be re-added.
    pub async fn run<C: ServerConnection>(&mut self, conn: &C) -> Result<(), ClientError> {
        while let Some(index) = self.select_next_file() {
            match self.upload_file(conn, index).await {
                Ok(final_name) => {
                    let task = &mut self.tasks[index];
                    debug!(file = %task.file_name, final_name = %final_name, "upload complete");
                    task.final_name = Some(final_name);
                    task.current_chunk = None;
                    self.last_uploaded = Some(index);
                    self.current_file = None;
                }
                Err(e) => {
                    self.tasks[index].error = Some(e.to_string());
                    self.current_file = None;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Selects the next pending file and makes it current.
    fn select_next_file(&mut self) -> Option<usize> {
        let next = self
            .tasks
            .iter()
            .position(|t| t.final_name.is_none() && t.error.is_none());
        self.current_file = next;
        next
    }

    /// Transfers one file: open, then chunks 0..total in order.
    async fn upload_file<C: ServerConnection>(
        &mut self,
        conn: &C,
        index: usize,
    ) -> Result<String, ClientError> {
        let (path, file_name, size) = {
            let task = &self.tasks[index];
            (task.path.clone(), task.file_name.clone(), task.size)
        };

        let open_req = UploadOpenRequest {
            file_name: file_name.clone(),
            size: size as i64,
        };
        let payload = serde_json::to_value(&open_req)?;
        let resp = conn.send_request(MessageType::UploadOpen, &payload).await?;
        let open: UploadOpenResponse = resp
            .parse_payload()?
            .ok_or_else(|| ClientError::UnexpectedResponse("empty open response".into()))?;

        // The server dictates the chunk size; 0 falls back to the default.
        let chunk_size = if open.chunk_size > 0 {
            open.chunk_size as usize
        } else {
            DEFAULT_CHUNK_SIZE
        };
        let total_chunks = chunk_count(size, chunk_size);
        self.tasks[index].total_chunks = total_chunks;
        self.tasks[index].current_chunk = Some(0);

        let mut splitter = ChunkSplitter::new(&path, chunk_size)?;

        loop {
            // Disk reads run off the async runtime.
            let (returned, chunk_result) = tokio::task::spawn_blocking(move || {
                let chunk = splitter.next_chunk();
                (splitter, chunk)
            })
            .await
            .map_err(|e| ClientError::Upload(format!("read task failed: {e}")))?;
            splitter = returned;

            let Some(chunk) = chunk_result? else {
                // total_chunks >= 1, so the last chunk returns below; getting
                // here means the file shrank after it was queued.
                return Err(ClientError::Upload(
                    "file ended before the declared last chunk".into(),
                ));
            };

            self.tasks[index].current_chunk = Some(chunk.index);
            let is_last = chunk.index == total_chunks - 1;

            let req = UploadChunkRequest {
                upload_id: open.upload_id.clone(),
                file_name: file_name.clone(),
                chunk_index: chunk.index,
                total_chunks,
                data: chunk.data,
            };
            let payload = serde_json::to_value(&req)?;
            let resp = conn.send_request(MessageType::UploadChunk, &payload).await?;
            let ack: UploadChunkResponse = resp
                .parse_payload()?
                .ok_or_else(|| ClientError::UnexpectedResponse("empty chunk ack".into()))?;

            // Only the observed ack advances the state machine.
            if is_last {
                return ack.final_name.ok_or_else(|| {
                    ClientError::UnexpectedResponse("last chunk ack missing final name".into())
                });
            }
            if ack.final_name.is_some() {
                return Err(ClientError::UnexpectedResponse(
                    "server finalized before the last chunk".into(),
                ));
            }
            self.tasks[index].current_chunk = Some(chunk.index + 1);
        }
    }
}
