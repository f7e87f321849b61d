//! Transfer router for one agent session.
//!
//! Interprets `send` envelopes from the agent, keeps the registries of open
//! blobs and files, answers `begin`/`data` events with acks and applies
//! patches to the output tree.
//!
//! Flow control is stop-and-wait per transfer: the agent holds its next
//! chunk for a token until the ack for the previous one arrives. Several
//! transfers may be in flight at once on the same session.

mod router;
mod sender;

pub use router::{Dispatch, RouterStats, TransferRouter};
pub use sender::{AckSender, SendError};

/// Ack channel capacity.
///
/// One ack is outstanding per open transfer, so this only needs to cover
/// the number of transfers the agent runs concurrently.
pub const ACK_BUFFER_SIZE: usize = 256;

/// Errors produced while interpreting agent messages.
///
/// All of them mean the agent and host disagree about the protocol state;
/// none is recoverable for the session.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Transfer(#[from] appdump_transfer::TransferError),

    #[error("invalid {subject} payload: {source}")]
    InvalidPayload {
        subject: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{subject} data event for {session} carries no binary payload")]
    MissingData {
        subject: &'static str,
        session: String,
    },
}
