//! WebSocket client for the upload protocol.
//!
//! Implements the request-response pattern with UUID correlation and
//! ping/pong keepalive.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use reelport_protocol::constants::{
    MessageType, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_REQUEST_TIMEOUT,
};
use reelport_protocol::envelope::Message;
use reelport_protocol::messages::{ClientHello, ServerStatus};

use crate::ClientError;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;

/// WebSocket client connected to an upload server.
///
/// All pumps stop when the client is closed or dropped.
pub struct WsClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: Pending,
    cancel: CancellationToken,
}

impl WsClient {
    /// Connects to an upload server and performs the hello handshake.
    ///
    /// Returns the client together with the server's advertised limits.
    pub async fn connect(url: &str, name: &str) -> Result<(Self, ServerStatus), ClientError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(64);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        tokio::spawn(write_pump(write, write_rx, cancel.clone()));
        tokio::spawn(read_pump(
            read,
            Arc::clone(&pending),
            write_tx.clone(),
            cancel.clone(),
        ));
        tokio::spawn(ping_pump(write_tx.clone(), cancel.clone()));

        let client = Self {
            write_tx,
            pending,
            cancel,
        };

        let hello = ClientHello {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").into(),
        };
        let resp = client
            .send_request(MessageType::ClientHello, Some(&hello))
            .await?;
        let status: ServerStatus = resp
            .parse_payload()?
            .ok_or_else(|| ClientError::UnexpectedResponse("empty server status".into()))?;

        tracing::info!(server = %status.name, version = %status.version, "connected");
        Ok((client, status))
    }

    /// Sends a request and waits for the correlated response.
    ///
    /// A structured error reply is unwrapped into [`ClientError::Server`].
    pub async fn send_request<T: serde::Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, ClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, payload)?;
        let json = serde_json::to_string(&msg)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| ClientError::Closed)?;

        let result = tokio::time::timeout(WS_REQUEST_TIMEOUT, rx).await;

        // Clean up the pending entry on any exit path.
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) => {
                if let Some(err) = &resp.error {
                    return Err(ClientError::Server {
                        code: err.code,
                        message: err.message.clone(),
                    });
                }
                Ok(resp)
            }
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Closes the connection and stops the pumps.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Write pump: forwards queued frames to the socket.
async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: futures_util::Sink<tungstenite::Message, Error = tungstenite::Error> + Send + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Read pump: routes responses to their pending request channels.
async fn read_pump<S>(
    mut stream: S,
    pending: Pending,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<tungstenite::Message, tungstenite::Error>>
        + Send
        + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        let msg: Message = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                tracing::error!("invalid message JSON: {e}");
                                continue;
                            }
                        };
                        match pending.lock().await.remove(&msg.id) {
                            Some(tx) => {
                                let _ = tx.send(msg);
                            }
                            None => {
                                tracing::debug!(id = %msg.id, "unmatched response, dropping");
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        let _ = write_tx.try_send(tungstenite::Message::Pong(data));
                    }
                    Some(Ok(tungstenite::Message::Close(_))) => {
                        tracing::info!("server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {} // Pong / binary / raw frames ignored.
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Wake every waiter so requests fail fast instead of timing out.
    pending.lock().await.clear();
    cancel.cancel();
}

/// Ping pump: keeps the connection alive.
async fn ping_pump(write_tx: mpsc::Sender<tungstenite::Message>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(WS_PING_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = interval.tick() => {
                if write_tx
                    .send(tungstenite::Message::Ping(Vec::new().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}
