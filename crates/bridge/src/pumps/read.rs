//! WebSocket read pump: dispatches responses and push events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use appdump_protocol::constants::MAX_FRAME_SIZE;
use appdump_protocol::messages::{DetachedEvent, ScriptMessageEvent};
use appdump_protocol::{Message, MessageType, decode_frame};
use appdump_session::InboundMessage;

use crate::routes::{PendingMap, Routes};

/// Reads frames until the connection ends, then fails every pending
/// request and reports every session as detached.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: PendingMap,
    routes: Arc<Routes>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = read.next() => match msg {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    handle_text(&text, &pending, &routes).await;
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    handle_binary(&data, &routes);
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    trace!("received ping, sending pong");
                    let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    debug!(?frame, "bridge closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("bridge read error: {e}");
                    break;
                }
                None => {
                    debug!("bridge stream ended");
                    break;
                }
            },
        }
    }

    closed.store(true, Ordering::SeqCst);
    cancel.cancel();
    // Dropping the senders fails every waiting request with `Closed`.
    pending.lock().await.clear();
    routes.close_all();
}

/// Handles a JSON text frame.
pub(crate) async fn handle_text(text: &str, pending: &PendingMap, routes: &Routes) {
    if text.len() > MAX_FRAME_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return;
    }

    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse bridge message: {e}");
            return;
        }
    };
    trace!(msg_type = ?msg.msg_type, id = %msg.id, "received message");

    if !msg.is_event() {
        let mut map = pending.lock().await;
        if let Some(tx) = map.remove(&msg.id) {
            let _ = tx.send(msg);
            return;
        }
    }

    dispatch_event(msg, None, routes);
}

/// Handles a binary frame: a `message` envelope followed by the agent's
/// data buffer.
pub(crate) fn handle_binary(data: &[u8], routes: &Routes) {
    match decode_frame::<Message>(data) {
        Ok((msg, payload)) => dispatch_event(msg, Some(payload), routes),
        Err(e) => warn!("invalid binary frame: {e}"),
    }
}

fn dispatch_event(msg: Message, data: Option<Vec<u8>>, routes: &Routes) {
    match msg.msg_type {
        MessageType::ScriptMessage => match msg.parse_payload::<ScriptMessageEvent>() {
            Ok(Some(event)) => {
                routes.deliver(&event.script, InboundMessage::new(event.message, data));
            }
            Ok(None) => warn!("script message without payload"),
            Err(e) => warn!("invalid script message: {e}"),
        },
        MessageType::Detached => match msg.parse_payload::<DetachedEvent>() {
            Ok(Some(event)) => routes.detached(event),
            Ok(None) => warn!("detached event without payload"),
            Err(e) => warn!("invalid detached event: {e}"),
        },
        other => {
            warn!(msg_type = ?other, id = %msg.id, "unexpected bridge message, dropping");
        }
    }
}
