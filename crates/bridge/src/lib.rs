//! Instrumentation backend speaking JSON over WebSocket.
//!
//! The bridge process owns the actual process attachments and script
//! engines; this crate exposes it through the `appdump-session` traits.
//! Requests are correlated by UUID. Script messages and detach
//! notifications are pushed by the bridge and routed to the script or
//! session they belong to.

pub mod client;
pub mod device;
pub mod error;
pub(crate) mod pumps;
pub(crate) mod routes;

pub use client::BridgeClient;
pub use device::{BridgeDevice, BridgeScript, BridgeSession};
pub use error::BridgeError;
