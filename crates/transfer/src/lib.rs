//! Reassembly of agent transfers on the local filesystem.
//!
//! - [`PathResolver`] maps device paths into the output directory and
//!   refuses anything that would land outside of it.
//! - [`ChunkAssembler`] collects an anonymous blob in memory until a later
//!   patch consumes it.
//! - [`StreamWriter`] streams a named file straight to disk.

mod blob;
mod file;
mod path;
mod progress;

pub use blob::ChunkAssembler;
pub use file::{StreamWriter, apply_file_times, create_output_file, write_at, write_zeros_at};
pub use path::PathResolver;
pub use progress::{ProgressCallback, ProgressTracker, SpeedCalculator, TransferProgress};

/// The two kinds of transfer an agent can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    /// `memcpy`: anonymous in-memory blob.
    Blob,
    /// `download`: named file streamed to disk.
    File,
}

impl std::fmt::Display for TransferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferKind::Blob => f.write_str("blob"),
            TransferKind::File => f.write_str("file"),
        }
    }
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("suspicious path: {0}")]
    SuspiciousPath(String),

    #[error("sequence violation in {session}: expected chunk {expected}, got {got}")]
    SequenceViolation {
        session: String,
        expected: u64,
        got: u64,
    },

    #[error("unknown {kind} session: {session}")]
    UnknownSession { kind: TransferKind, session: String },

    #[error("region of {len} bytes at offset {offset} exceeds the maximum file size")]
    RegionTooLarge { offset: u64, len: u64 },

    #[error("{subject} message missing field `{field}`")]
    MissingField {
        subject: &'static str,
        field: &'static str,
    },
}
