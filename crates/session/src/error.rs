use std::path::PathBuf;

/// Errors produced while driving a dump.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Router(#[from] appdump_router::RouterError),

    #[error("transfer error: {0}")]
    Transfer(#[from] appdump_transfer::TransferError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("destination already exists: {} (use --force to overwrite)", .0.display())]
    DestinationExists(PathBuf),

    #[error("application not found: {0}")]
    AppNotFound(String),

    #[error("validation bypass failed for pid {pid} (status {status})")]
    ChildBypassFailed { pid: u32, status: i64 },

    #[error("agent script error: {0}")]
    ScriptError(String),

    #[error("session detached: {0}")]
    SessionDetached(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("unexpected result from {method}: {detail}")]
    InvalidResponse { method: String, detail: String },
}
