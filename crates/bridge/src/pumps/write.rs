//! Outbound half of the bridge socket.

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message as Frame};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Moves queued frames onto the socket until the queue closes or `cancel`
/// fires, then sends a close frame.
///
/// Frames queued before cancellation (acks in particular) are still
/// written. A failed write ends the pump without a close frame.
pub(crate) async fn write_pump<S>(
    mut socket: S,
    mut queue: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) where
    S: Sink<Frame, Error = tungstenite::Error> + Unpin,
{
    let mut sent = 0usize;

    let reason = loop {
        let next = tokio::select! {
            biased;
            frame = queue.recv() => frame,
            _ = cancel.cancelled() => break "cancelled",
        };
        let Some(frame) = next else {
            break "queue closed";
        };
        if let Err(e) = socket.send(frame).await {
            error!(sent, error = %e, "bridge write failed");
            return;
        }
        sent += 1;
    };

    queue.close();
    while let Ok(frame) = queue.try_recv() {
        if let Err(e) = socket.feed(frame).await {
            error!(sent, error = %e, "bridge write failed while flushing");
            return;
        }
        sent += 1;
    }

    let _ = socket.send(Frame::Close(None)).await;
    debug!(sent, reason, "write pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;

    /// Sink recording every frame, plus the receiver it records into.
    fn recorder() -> (
        impl Sink<Frame, Error = tungstenite::Error> + Unpin,
        mpsc::UnboundedReceiver<Frame>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = sink::unfold(tx, |tx, frame: Frame| async move {
            let _ = tx.send(frame);
            Ok::<_, tungstenite::Error>(tx)
        });
        (Box::pin(sink), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn writes_in_order_and_closes_with_the_queue() {
        let (socket, mut written) = recorder();
        let (tx, queue) = mpsc::channel(8);

        tx.send(Frame::Text("attach".into())).await.unwrap();
        tx.send(Frame::Binary(vec![1u8, 2, 3].into())).await.unwrap();
        drop(tx);

        write_pump(socket, queue, CancellationToken::new()).await;

        let frames = drain(&mut written);
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], Frame::Text(t) if t.as_str() == "attach"));
        assert!(matches!(&frames[1], Frame::Binary(b) if b[..] == [1u8, 2, 3]));
        assert!(matches!(frames[2], Frame::Close(None)));
    }

    #[tokio::test]
    async fn queued_frames_survive_cancellation() {
        let (socket, mut written) = recorder();
        let (tx, queue) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            tx.send(Frame::Text(r#"{"type":"post"}"#.into())).await.unwrap();
        }
        cancel.cancel();

        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            write_pump(socket, queue, cancel),
        )
        .await
        .expect("pump stops once cancelled");

        let frames = drain(&mut written);
        assert_eq!(frames.len(), 4);
        assert!(frames[..3].iter().all(|f| matches!(f, Frame::Text(_))));
        assert!(matches!(frames[3], Frame::Close(None)));
        // The queue is closed behind the pump.
        assert!(tx.send(Frame::Text("late".into())).await.is_err());
    }

    #[tokio::test]
    async fn failed_write_ends_without_close() {
        let failing = sink::unfold((), |(), _frame: Frame| async {
            Err::<(), _>(tungstenite::Error::ConnectionClosed)
        });
        let (tx, queue) = mpsc::channel(8);
        tx.send(Frame::Text("x".into())).await.unwrap();

        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            write_pump(Box::pin(failing), queue, CancellationToken::new()),
        )
        .await
        .expect("pump stops on write error");
    }
}
