use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Connection payloads
// ---------------------------------------------------------------------------

/// Sent by a client right after the WebSocket connection is established.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHello {
    pub name: String,
    pub version: String,
}

/// Server's reply to `client_hello`, advertising the upload limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub name: String,
    pub version: String,
    pub chunk_size: i32,
    pub max_file_size: i64,
    pub allowed_extensions: Vec<String>,
    pub accept_uploads: bool,
}

// ---------------------------------------------------------------------------
// Upload payloads
// ---------------------------------------------------------------------------

/// Starts a new upload and requests an assembly key for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOpenRequest {
    pub file_name: String,
    pub size: i64,
}

/// Acknowledges `upload_open` with the upload token and the chunk size
/// the server expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOpenResponse {
    pub upload_id: String,
    pub chunk_size: i32,
}

/// One chunk of file data.
///
/// The `data` field is base64-encoded in JSON, keeping the envelope
/// text-safe; the index addresses the chunk within the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkRequest {
    pub upload_id: String,
    pub file_name: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Acknowledges a chunk.
///
/// `final_name` is present exactly on the response to the last chunk and
/// is the client's completion signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    pub upload_id: String,
    pub bytes_written: i64,
    pub total_written: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Custom base64 serde module for raw chunk bytes inside JSON.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
