//! Session lifecycle and dump orchestration.
//!
//! The instrumentation engine is reached through the [`Device`],
//! [`Session`] and [`Script`] traits. A [`SessionLink`] ties one remote
//! session to its injected script and its [`TransferRouter`]; the
//! [`DumpOrchestrator`] drives the main target, the auxiliary bypass
//! session and each child component through the dump workflow.
//!
//! [`TransferRouter`]: appdump_router::TransferRouter

pub mod backend;
pub mod detach;
pub mod error;
pub mod link;
pub mod orchestrator;
pub mod types;

pub use backend::{BoxFuture, DetachObserver, Device, InboundMessage, Outbox, Script, Session};
pub use detach::{DetachSeverity, classify_detach, log_detach, logging_observer};
pub use error::DumpError;
pub use link::SessionLink;
pub use orchestrator::DumpOrchestrator;
pub use types::{AgentOps, ChildOutcome, DumpOptions, DumpReport, DumpState};

#[cfg(test)]
mod mock;
