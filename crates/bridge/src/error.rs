use appdump_protocol::{FrameError, RemoteError};
use appdump_session::DumpError;
use tokio_tungstenite::tungstenite;

/// Errors from the bridge connection.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("write queue full")]
    QueueFull,

    #[error("bridge error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("empty {0} response")]
    EmptyResponse(&'static str),
}

impl From<RemoteError> for BridgeError {
    fn from(e: RemoteError) -> Self {
        BridgeError::Remote {
            code: e.code,
            message: e.message,
        }
    }
}

impl From<BridgeError> for DumpError {
    fn from(e: BridgeError) -> Self {
        DumpError::Backend(e.to_string())
    }
}
