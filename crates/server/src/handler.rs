//! Handler trait for processing WebSocket messages.
//!
//! Implementors provide the upload logic while the server framework
//! handles connection management, routing, and keepalive.

use std::future::Future;
use std::pin::Pin;

use reelport_protocol::constants::ERR_CODE_NOT_IMPLEMENTED;
use reelport_protocol::envelope::Message;

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling WebSocket messages from a client.
///
/// The server dispatches parsed envelopes to the appropriate method.
/// Each method receives:
/// - `sender`: channel to send responses back to the client
/// - `msg`: the parsed JSON envelope
///
/// Default implementations reply with "not implemented" so handlers only
/// need to override the message types they care about.
pub trait Handler: Send + Sync + 'static {
    /// Called when a client introduces itself (`client_hello`).
    /// The handler should reply with `server_status`.
    fn on_client_hello(&self, sender: Sender, msg: Message) -> HandlerFuture<'_>;

    /// Called for `ping` messages.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) =
                msg.reply(reelport_protocol::MessageType::Pong, Option::<&()>::None)
            {
                let _ = sender.send_msg(reply);
            }
        })
    }

    /// Called for `upload_open`.
    fn on_upload_open(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `upload_chunk`.
    fn on_upload_chunk(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called when a client disconnects (cleanup hook).
    fn on_client_disconnected(&self) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}
