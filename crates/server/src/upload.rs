//! Concrete upload handler: bridges protocol messages to the assembly store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reelport_protocol::constants::{
    ALLOWED_EXTENSIONS, ERR_CODE_BAD_REQUEST, ERR_CODE_CONFLICT, ERR_CODE_INTERNAL,
    ERR_CODE_NOT_FOUND, ERR_CODE_PAYLOAD_TOO_LARGE, MAX_FILE_SIZE, MessageType,
};
use reelport_protocol::envelope::Message;
use reelport_protocol::messages::{
    ClientHello, ServerStatus, UploadChunkRequest, UploadChunkResponse, UploadOpenRequest,
    UploadOpenResponse,
};
use reelport_transfer::{AssemblyStore, ChunkOutcome, TransferError};

use crate::connection::Sender;
use crate::handler::{Handler, HandlerFuture};

/// Maps a transfer error to its wire status code.
fn wire_code(err: &TransferError) -> i32 {
    match err {
        TransferError::UnsupportedExtension(_)
        | TransferError::FileTooLarge { .. }
        | TransferError::OversizedChunk { .. } => ERR_CODE_PAYLOAD_TOO_LARGE,
        TransferError::UnknownUpload(_) => ERR_CODE_NOT_FOUND,
        TransferError::OutOfOrderChunk { .. } => ERR_CODE_CONFLICT,
        TransferError::InvalidName(_)
        | TransferError::InvalidSize(_)
        | TransferError::ChunkMismatch(_) => ERR_CODE_BAD_REQUEST,
        TransferError::Io(_) => ERR_CODE_INTERNAL,
    }
}

/// Upload handler over an [`AssemblyStore`].
///
/// Assemblies deliberately outlive their connection: a client that drops
/// mid-sequence leaves its temp file to the reaper, and a reconnecting
/// client starts a fresh upload.
pub struct UploadHandler {
    store: Arc<AssemblyStore>,
    accept_uploads: Arc<AtomicBool>,
}

impl UploadHandler {
    /// Creates a handler. `accept_uploads` is reported in `server_status`
    /// and usually shares the Arc with the server's accept flag.
    pub fn new(store: Arc<AssemblyStore>, accept_uploads: Arc<AtomicBool>) -> Self {
        Self {
            store,
            accept_uploads,
        }
    }

    /// The assembly store backing this handler.
    pub fn store(&self) -> &Arc<AssemblyStore> {
        &self.store
    }
}

impl Handler for UploadHandler {
    fn on_client_hello(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let hello: ClientHello = match msg.parse_payload() {
                Ok(Some(h)) => h,
                _ => {
                    let _ = sender.send_error(&msg, ERR_CODE_BAD_REQUEST, "invalid payload");
                    return;
                }
            };
            tracing::info!(client = %hello.name, version = %hello.version, "client hello");

            let status = ServerStatus {
                name: "reelport".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                chunk_size: self.store.chunk_size() as i32,
                max_file_size: MAX_FILE_SIZE,
                allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
                accept_uploads: self.accept_uploads.load(Ordering::Relaxed),
            };
            if let Ok(reply) = msg.reply(MessageType::ServerStatus, Some(&status)) {
                let _ = sender.send_msg(reply);
            }
        })
    }

    fn on_upload_open(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: UploadOpenRequest = match msg.parse_payload() {
                Ok(Some(r)) => r,
                _ => {
                    let _ = sender.send_error(&msg, ERR_CODE_BAD_REQUEST, "invalid payload");
                    return;
                }
            };

            // Validation only, no disk I/O yet.
            match self.store.open(&req.file_name, req.size) {
                Ok(upload_id) => {
                    let resp = UploadOpenResponse {
                        upload_id,
                        chunk_size: self.store.chunk_size() as i32,
                    };
                    if let Ok(reply) = msg.reply(MessageType::UploadOpenResponse, Some(&resp)) {
                        let _ = sender.send_msg(reply);
                    }
                }
                Err(e) => {
                    let _ = sender.send_error(&msg, wire_code(&e), &e.to_string());
                }
            }
        })
    }

    fn on_upload_chunk(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            // A failed parse includes undecodable base64 chunk data.
            let req: UploadChunkRequest = match msg.parse_payload() {
                Ok(Some(r)) => r,
                _ => {
                    let _ = sender.send_error(&msg, ERR_CODE_BAD_REQUEST, "invalid chunk payload");
                    return;
                }
            };

            let upload_id = req.upload_id.clone();
            let chunk_len = req.data.len() as i64;

            // Disk appends run off the async runtime.
            let store = Arc::clone(&self.store);
            let result = tokio::task::spawn_blocking(move || {
                store.accept_chunk(
                    &req.upload_id,
                    &req.file_name,
                    req.chunk_index,
                    req.total_chunks,
                    &req.data,
                )
            })
            .await;

            let outcome = match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    let _ = sender.send_error(&msg, wire_code(&e), &e.to_string());
                    return;
                }
                Err(e) => {
                    tracing::error!("chunk write task failed: {e}");
                    let _ = sender.send_error(&msg, ERR_CODE_INTERNAL, "chunk write failed");
                    return;
                }
            };

            // The ack is always sent; the client blocks waiting for it.
            let resp = match outcome {
                ChunkOutcome::Continue {
                    bytes_written,
                    total_written,
                } => UploadChunkResponse {
                    upload_id,
                    bytes_written,
                    total_written,
                    final_name: None,
                },
                ChunkOutcome::Done {
                    final_name,
                    total_written,
                } => UploadChunkResponse {
                    upload_id,
                    bytes_written: chunk_len,
                    total_written,
                    final_name: Some(final_name),
                },
            };
            if let Ok(reply) = msg.reply(MessageType::UploadChunkResponse, Some(&resp)) {
                let _ = sender.send_msg(reply);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_sender;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

    fn handler(dir: &TempDir, chunk_size: usize) -> UploadHandler {
        let store = Arc::new(AssemblyStore::new(dir.path(), chunk_size).unwrap());
        UploadHandler::new(store, Arc::new(AtomicBool::new(true)))
    }

    async fn recv_envelope(rx: &mut mpsc::Receiver<WsMessage>) -> Message {
        let Some(WsMessage::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        serde_json::from_str(&text).unwrap()
    }

    fn open_msg(id: &str, file_name: &str, size: i64) -> Message {
        let req = UploadOpenRequest {
            file_name: file_name.into(),
            size,
        };
        Message::new(id, MessageType::UploadOpen, Some(&req)).unwrap()
    }

    fn chunk_msg(
        id: &str,
        upload_id: &str,
        file_name: &str,
        index: u32,
        total: u32,
        data: &[u8],
    ) -> Message {
        let req = UploadChunkRequest {
            upload_id: upload_id.into(),
            file_name: file_name.into(),
            chunk_index: index,
            total_chunks: total,
            data: data.to_vec(),
        };
        Message::new(id, MessageType::UploadChunk, Some(&req)).unwrap()
    }

    #[tokio::test]
    async fn hello_reports_limits() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, 4);
        let (sender, mut rx) = test_sender();

        let hello = ClientHello {
            name: "test".into(),
            version: "0.1.0".into(),
        };
        let msg = Message::new("h1", MessageType::ClientHello, Some(&hello)).unwrap();
        handler.on_client_hello(sender, msg).await;

        let reply = recv_envelope(&mut rx).await;
        assert_eq!(reply.id, "h1");
        assert_eq!(reply.msg_type, MessageType::ServerStatus);
        let status: ServerStatus = reply.parse_payload().unwrap().unwrap();
        assert_eq!(status.chunk_size, 4);
        assert_eq!(status.max_file_size, MAX_FILE_SIZE);
        assert!(status.accept_uploads);
        assert_eq!(status.allowed_extensions, vec!["mp4", "avi", "mkv"]);
    }

    #[tokio::test]
    async fn open_then_chunks_until_final_name() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, 4);

        let (sender, mut rx) = test_sender();
        handler
            .on_upload_open(sender.clone(), open_msg("o1", "clip.mp4", 10))
            .await;
        let reply = recv_envelope(&mut rx).await;
        assert_eq!(reply.msg_type, MessageType::UploadOpenResponse);
        let open: UploadOpenResponse = reply.parse_payload().unwrap().unwrap();
        assert_eq!(open.chunk_size, 4);

        // Chunks 0 and 1 continue.
        for (i, data) in [(0u32, &b"AABB"[..]), (1, &b"CCDD"[..])] {
            handler
                .on_upload_chunk(
                    sender.clone(),
                    chunk_msg("c", &open.upload_id, "clip.mp4", i, 3, data),
                )
                .await;
            let ack: UploadChunkResponse =
                recv_envelope(&mut rx).await.parse_payload().unwrap().unwrap();
            assert_eq!(ack.final_name, None);
            assert_eq!(ack.bytes_written, 4);
        }

        // Final chunk reports the final name.
        handler
            .on_upload_chunk(
                sender,
                chunk_msg("c-last", &open.upload_id, "clip.mp4", 2, 3, b"EE"),
            )
            .await;
        let ack: UploadChunkResponse =
            recv_envelope(&mut rx).await.parse_payload().unwrap().unwrap();
        let final_name = ack.final_name.expect("final chunk must name the file");
        assert!(final_name.ends_with(".mp4"));
        assert_eq!(ack.total_written, 10);
        assert_eq!(
            std::fs::read(dir.path().join(final_name)).unwrap(),
            b"AABBCCDDEE"
        );
    }

    #[tokio::test]
    async fn open_rejects_bad_extension_with_413() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, 4);
        let (sender, mut rx) = test_sender();

        handler
            .on_upload_open(sender, open_msg("o1", "video.txt", 10))
            .await;
        let reply = recv_envelope(&mut rx).await;
        assert_eq!(reply.msg_type, MessageType::Error);
        assert_eq!(reply.error.unwrap().code, ERR_CODE_PAYLOAD_TOO_LARGE);
        // No temp file was created.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn chunk_for_unknown_upload_is_404() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, 4);
        let (sender, mut rx) = test_sender();

        handler
            .on_upload_chunk(sender, chunk_msg("c1", "nope", "clip.mp4", 0, 1, b"da"))
            .await;
        let reply = recv_envelope(&mut rx).await;
        assert_eq!(reply.error.unwrap().code, ERR_CODE_NOT_FOUND);
    }

    #[tokio::test]
    async fn out_of_order_chunk_is_409() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, 4);
        let (sender, mut rx) = test_sender();

        handler
            .on_upload_open(sender.clone(), open_msg("o1", "clip.mp4", 10))
            .await;
        let open: UploadOpenResponse =
            recv_envelope(&mut rx).await.parse_payload().unwrap().unwrap();

        handler
            .on_upload_chunk(
                sender.clone(),
                chunk_msg("c1", &open.upload_id, "clip.mp4", 0, 3, b"AABB"),
            )
            .await;
        let _ = recv_envelope(&mut rx).await;

        handler
            .on_upload_chunk(
                sender,
                chunk_msg("c2", &open.upload_id, "clip.mp4", 2, 3, b"EE"),
            )
            .await;
        let reply = recv_envelope(&mut rx).await;
        assert_eq!(reply.error.unwrap().code, ERR_CODE_CONFLICT);
    }

    #[tokio::test]
    async fn undecodable_chunk_payload_is_400() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir, 4);
        let (sender, mut rx) = test_sender();

        // Hand-built payload with invalid base64 data.
        let raw = serde_json::json!({
            "uploadId": "u1",
            "fileName": "clip.mp4",
            "chunkIndex": 0,
            "totalChunks": 1,
            "data": "!!! not base64 !!!"
        });
        let msg = Message::new("c1", MessageType::UploadChunk, Some(&raw)).unwrap();
        handler.on_upload_chunk(sender, msg).await;

        let reply = recv_envelope(&mut rx).await;
        assert_eq!(reply.error.unwrap().code, ERR_CODE_BAD_REQUEST);
    }
}
