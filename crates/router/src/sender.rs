//! Outbound flow-control channel.

use appdump_protocol::Outbound;
use tokio::sync::mpsc;

use crate::ACK_BUFFER_SIZE;

/// Handle for posting acks back to the agent.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`. The owner of the receiving
/// end forwards each [`Outbound`] to the script.
#[derive(Clone)]
pub struct AckSender {
    tx: mpsc::Sender<Outbound>,
}

impl AckSender {
    /// Creates a sender and the receiver its messages arrive on.
    pub fn channel() -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(ACK_BUFFER_SIZE);
        (Self { tx }, rx)
    }

    /// Queues an ack without waiting.
    ///
    /// Returns `Err` only if the channel is full or closed (session gone).
    pub fn send_ack(&self) -> Result<(), SendError> {
        self.tx.try_send(Outbound::Ack).map_err(|_| {
            tracing::warn!("ack buffer full or closed, dropping ack");
            SendError
        })
    }
}

/// Error returned when the ack channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or session closed")]
pub struct SendError;
