use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed chunk size: 1 MiB.
///
/// The server dictates the actual size via `UploadOpenResponse.chunk_size`;
/// this is the value it advertises and the client's fallback.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Maximum accepted file size: 200 MiB.
pub const MAX_FILE_SIZE: i64 = 200 * 1024 * 1024;

/// Maximum WebSocket message size (4 MiB).
///
/// Bounds a single base64 chunk envelope (a full 1 MiB chunk encodes to
/// roughly 1.4 MiB of text), not the whole file.
pub const WS_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// File extensions accepted for upload (common video containers), lowercase.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv"];

/// File-name prefix marking an in-progress assembly on disk.
pub const TMP_PREFIX: &str = "tmp_";

/// How often to send WebSocket pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Time to wait for a pong response (or any incoming message).
///
/// This acts as a read deadline: if *nothing* arrives within this window
/// the connection is considered dead. Set high enough to tolerate slow
/// chunk appends on the server side.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Timeout for request/response operations.
///
/// Covers the server's disk append for a chunk, so it is sized for slow
/// disks rather than for round-trip latency alone.
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Connection management
    #[serde(rename = "client_hello")]
    ClientHello,
    #[serde(rename = "server_status")]
    ServerStatus,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,

    // Upload requests from client to server
    #[serde(rename = "upload_open")]
    UploadOpen,
    #[serde(rename = "upload_chunk")]
    UploadChunk,

    // Responses from server to client
    #[serde(rename = "upload_open_response")]
    UploadOpenResponse,
    #[serde(rename = "upload_chunk_response")]
    UploadChunkResponse,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Common wire error codes.
pub const ERR_CODE_BAD_REQUEST: i32 = 400;
pub const ERR_CODE_NOT_FOUND: i32 = 404;
pub const ERR_CODE_CONFLICT: i32 = 409;
pub const ERR_CODE_PAYLOAD_TOO_LARGE: i32 = 413;
pub const ERR_CODE_INTERNAL: i32 = 500;
pub const ERR_CODE_NOT_IMPLEMENTED: i32 = 501;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageType::ClientHello).unwrap(),
            "\"client_hello\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::UploadChunk).unwrap(),
            "\"upload_chunk\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::UploadChunkResponse).unwrap(),
            "\"upload_chunk_response\""
        );
    }

    #[test]
    fn message_type_deserialization() {
        let mt: MessageType = serde_json::from_str("\"upload_open\"").unwrap();
        assert_eq!(mt, MessageType::UploadOpen);
    }

    #[test]
    fn unknown_message_type() {
        let mt: MessageType = serde_json::from_str("\"some_future_type\"").unwrap();
        assert_eq!(mt, MessageType::Unknown);
    }

    #[test]
    fn envelope_fits_one_chunk() {
        // A full base64 chunk plus JSON framing must fit in one message.
        assert!(CHUNK_SIZE * 4 / 3 + 1024 < WS_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn allowed_extensions_are_lowercase() {
        for ext in ALLOWED_EXTENSIONS {
            assert_eq!(*ext, ext.to_lowercase());
        }
    }
}
