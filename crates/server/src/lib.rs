//! WebSocket upload server for reelport.
//!
//! Accepts any number of client connections, dispatches JSON envelope
//! messages to a [`Handler`], and ships the concrete [`UploadHandler`]
//! that assembles uploaded chunks through
//! [`reelport_transfer::AssemblyStore`].

mod connection;
mod handler;
mod server;
mod upload;

pub use connection::Sender;
pub use handler::{Handler, HandlerFuture};
pub use server::{ServerConfig, UploadServer};
pub use upload::UploadHandler;

/// Send buffer capacity per connection.
///
/// The server sends one ack per chunk and the client waits for it before
/// sending the next, so the buffer never holds more than a handful of
/// messages.
pub const SEND_BUFFER_SIZE: usize = 64;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection rejected")]
    ConnectionRejected,
}
