//! reelport client: WebSocket transport and the chunked upload driver.

mod driver;
mod error;
mod task;
mod ws_client;

pub use driver::{ServerConnection, UploadDriver};
pub use error::ClientError;
pub use task::UploadTask;
pub use ws_client::WsClient;
