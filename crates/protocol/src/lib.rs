//! Wire types shared by the host-side crates.
//!
//! Two protocols live here:
//!
//! - the **agent protocol**: messages an injected script posts back to the
//!   host (`send` envelopes carrying `memcpy` / `patch` / `download`
//!   subjects) and the `ack` the host posts in return;
//! - the **bridge protocol**: request/response envelopes exchanged with the
//!   instrumentation bridge that owns the actual process attachments.

pub mod agent;
pub mod constants;
pub mod envelope;
pub mod frame;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use agent::{
    AgentPayload, DownloadMessage, FileStat, MemcpyMessage, Outbound, PatchMessage,
    ScriptMessage, ScriptMessageKind, TransferEvent,
};
pub use constants::MessageType;
pub use envelope::{Message, RemoteError};
pub use frame::{FrameError, decode_frame, encode_frame};
pub use types::{ApplicationInfo, AttachTarget, CrashReport, DetachReason};
