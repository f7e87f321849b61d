//! WebSocket client for the instrumentation bridge.
//!
//! Implements the request-response pattern with UUID correlation and
//! routes push events (`message`, `detached`) to their script or session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use appdump_protocol::constants::{BRIDGE_REQUEST_TIMEOUT, MAX_FRAME_SIZE};
use appdump_protocol::messages::PostRequest;
use appdump_protocol::{Message, MessageType};

use crate::error::BridgeError;
use crate::routes::{PendingMap, Routes};

/// Capacity of the outbound frame queue.
const WRITE_BUFFER_SIZE: usize = 256;

/// Connection to one bridge process.
pub struct BridgeClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: PendingMap,
    routes: Arc<Routes>,
    /// Set by the read pump once the connection is gone.
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
}

impl BridgeClient {
    /// Connects to the bridge and starts the read and write pumps.
    pub async fn connect(url: &str) -> Result<Self, BridgeError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(MAX_FRAME_SIZE);
        ws_config.max_frame_size = Some(MAX_FRAME_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();
        info!(url, "connected to bridge");

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(WRITE_BUFFER_SIZE);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let routes = Arc::new(Routes::default());
        let closed = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let pending = pending.clone();
            let routes = routes.clone();
            let write_tx = write_tx.clone();
            let closed = closed.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read, pending, routes, write_tx, closed, cancel,
            ))
        };

        Ok(Self {
            write_tx,
            pending,
            routes,
            closed,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
        })
    }

    /// Sends a control request and waits for the response.
    pub async fn request<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, BridgeError> {
        self.send_request(msg_type, payload, Some(BRIDGE_REQUEST_TIMEOUT))
            .await
    }

    /// Sends a control request and decodes the response payload.
    pub async fn request_as<T: Serialize, R: DeserializeOwned>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<R, BridgeError> {
        let name = request_name(&msg_type);
        let resp = self.request(msg_type, payload).await?;
        resp.parse_payload::<R>()?
            .ok_or(BridgeError::EmptyResponse(name))
    }

    /// Sends a request without a deadline.
    ///
    /// Used for agent RPC calls, which last as long as the agent works.
    pub async fn request_untimed<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, BridgeError> {
        self.send_request(msg_type, payload, None).await
    }

    async fn send_request<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
        timeout: Option<Duration>,
    ) -> Result<Message, BridgeError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, payload)?;
        let json = serde_json::to_string(&msg)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        // The read pump sets the flag before clearing `pending`, so a
        // request inserted after the clear is caught here.
        if self.is_closed()
            || self
                .write_tx
                .send(tungstenite::Message::Text(json.into()))
                .await
                .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(BridgeError::Closed);
        }

        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| BridgeError::Timeout),
            None => Ok(rx.await),
        };

        // Clean up pending entry on any exit path.
        self.pending.lock().await.remove(&id);

        match result? {
            Ok(resp) => Ok(resp.into_result()?),
            Err(_) => Err(BridgeError::Closed),
        }
    }

    /// Queues a message for a script without waiting.
    pub fn post(&self, request: &PostRequest) -> Result<(), BridgeError> {
        let msg = Message::event(MessageType::Post, Some(request))?;
        let json = serde_json::to_string(&msg)?;
        self.write_tx
            .try_send(tungstenite::Message::Text(json.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BridgeError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => BridgeError::Closed,
            })
    }

    /// Returns `true` once the bridge connection is gone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn routes(&self) -> &Routes {
        &self.routes
    }

    /// Gracefully closes the connection.
    ///
    /// The write pump flushes what is queued and sends the close frame.
    pub async fn close(&self) {
        debug!("closing bridge connection");
        self.cancel.cancel();
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
    }
}

fn request_name(msg_type: &MessageType) -> &'static str {
    match msg_type {
        MessageType::EnumerateApplications => "enumerate_applications",
        MessageType::Spawn => "spawn",
        MessageType::Attach => "attach",
        MessageType::CreateScript => "create_script",
        MessageType::Call => "call",
        _ => "bridge",
    }
}
