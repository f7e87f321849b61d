//! Collaborator traits for the instrumentation engine.
//!
//! The orchestrator only talks to these traits. `appdump-bridge`
//! implements them over a WebSocket; tests implement them in memory.
//!
//! Ordering contract: a script's message receiver yields messages in the
//! order the agent emitted them, and a [`Script::call`] result is delivered
//! only after every message the agent sent before replying has been
//! enqueued.

use std::future::Future;
use std::pin::Pin;

use appdump_protocol::{ApplicationInfo, AttachTarget, CrashReport, DetachReason, ScriptMessage};
use tokio::sync::mpsc;

use crate::error::DumpError;

/// Boxed future returned by the backend traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback invoked when a session detaches.
pub type DetachObserver = Box<dyn Fn(DetachReason, Option<CrashReport>) + Send + Sync>;

/// A message posted by the agent, with its optional binary attachment.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message: ScriptMessage,
    pub data: Option<Vec<u8>>,
}

impl InboundMessage {
    pub fn new(message: ScriptMessage, data: Option<Vec<u8>>) -> Self {
        Self { message, data }
    }
}

/// The device hosting the target processes.
pub trait Device: Send + Sync {
    fn enumerate_applications(&self) -> BoxFuture<'_, Result<Vec<ApplicationInfo>, DumpError>>;

    /// Launches an application suspended and returns its pid.
    fn spawn(&self, identifier: String) -> BoxFuture<'_, Result<u32, DumpError>>;

    fn resume(&self, pid: u32) -> BoxFuture<'_, Result<(), DumpError>>;

    fn attach(&self, target: AttachTarget) -> BoxFuture<'_, Result<Box<dyn Session>, DumpError>>;

    fn kill(&self, pid: u32) -> BoxFuture<'_, Result<(), DumpError>>;
}

/// An attachment to one remote process.
pub trait Session: Send + Sync {
    fn pid(&self) -> u32;

    /// Injects `source` into the process. The script is not loaded yet.
    fn create_script(&self, source: String) -> BoxFuture<'_, Result<Box<dyn Script>, DumpError>>;

    fn detach(&self) -> BoxFuture<'_, Result<(), DumpError>>;

    /// Registers the observer called when the session goes away, whoever
    /// initiated it.
    fn on_detached(&self, observer: DetachObserver);
}

/// Fire-and-forget channel from the host to the agent.
pub trait Outbox: Send + Sync {
    /// Queues `message` for the agent without waiting for delivery.
    fn post(&self, message: serde_json::Value) -> Result<(), DumpError>;
}

/// An injected agent script.
pub trait Script: Outbox {
    fn load(&self) -> BoxFuture<'_, Result<(), DumpError>>;

    fn unload(&self) -> BoxFuture<'_, Result<(), DumpError>>;

    /// Invokes an exported RPC method and waits for its result.
    fn call(
        &self,
        method: String,
        args: Vec<serde_json::Value>,
    ) -> BoxFuture<'_, Result<serde_json::Value, DumpError>>;

    /// Takes the receiver of agent messages. Returns `None` after the
    /// first call.
    fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>>;
}
