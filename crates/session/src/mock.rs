//! In-memory backend for tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use appdump_protocol::{ApplicationInfo, AttachTarget, DetachReason, ScriptMessage};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::backend::{
    BoxFuture, DetachObserver, Device, InboundMessage, Outbox, Script, Session,
};
use crate::error::DumpError;

/// Pid the mock gives to sessions attached by name.
pub const SERVICE_PID: u32 = 1;

/// Pid of spawned applications.
pub const SPAWNED_PID: u32 = 500;

type AgentFn = dyn Fn(u32, &str, &[Value], &AgentHandle) -> Result<Value, DumpError> + Send + Sync;

pub fn ok(value: Value) -> Result<Value, DumpError> {
    Ok(value)
}

/// Lets a mock agent post messages before its RPC returns.
pub struct AgentHandle {
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl AgentHandle {
    pub fn send(&self, payload: Value) {
        self.push(payload, None);
    }

    pub fn send_data(&self, payload: Value, data: &[u8]) {
        self.push(payload, Some(data.to_vec()));
    }

    fn push(&self, payload: Value, data: Option<Vec<u8>>) {
        let message = ScriptMessage::send(&payload).unwrap();
        let _ = self.tx.send(InboundMessage::new(message, data));
    }

    pub fn error(&self, description: &str) {
        let _ = self
            .tx
            .send(InboundMessage::new(ScriptMessage::error(description), None));
    }
}

#[derive(Default)]
struct Shared {
    log: Mutex<Vec<String>>,
    acks: AtomicU32,
}

impl Shared {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

pub struct MockDevice {
    apps: Vec<ApplicationInfo>,
    agent: Arc<AgentFn>,
    shared: Arc<Shared>,
    fail_attach: Mutex<Vec<u32>>,
}

impl MockDevice {
    pub fn new<F>(agent: F) -> Self
    where
        F: Fn(u32, &str, &[Value], &AgentHandle) -> Result<Value, DumpError> + Send + Sync + 'static,
    {
        Self {
            apps: Vec::new(),
            agent: Arc::new(agent),
            shared: Arc::new(Shared::default()),
            fail_attach: Mutex::new(Vec::new()),
        }
    }

    pub fn with_app(mut self, identifier: &str, pid: u32) -> Self {
        self.apps.push(ApplicationInfo {
            identifier: identifier.into(),
            name: identifier.rsplit('.').next().unwrap_or(identifier).into(),
            pid,
        });
        self
    }

    pub fn fail_attach(&self, pid: u32) {
        self.fail_attach.lock().unwrap().push(pid);
    }

    pub fn log(&self) -> Vec<String> {
        self.shared.log.lock().unwrap().clone()
    }

    pub fn acks(&self) -> u32 {
        self.shared.acks.load(Ordering::SeqCst)
    }
}

impl Device for MockDevice {
    fn enumerate_applications(&self) -> BoxFuture<'_, Result<Vec<ApplicationInfo>, DumpError>> {
        Box::pin(async move { Ok(self.apps.clone()) })
    }

    fn spawn(&self, identifier: String) -> BoxFuture<'_, Result<u32, DumpError>> {
        Box::pin(async move {
            self.shared.record(format!("spawn {identifier}"));
            Ok(SPAWNED_PID)
        })
    }

    fn resume(&self, pid: u32) -> BoxFuture<'_, Result<(), DumpError>> {
        Box::pin(async move {
            self.shared.record(format!("resume {pid}"));
            Ok(())
        })
    }

    fn attach(&self, target: AttachTarget) -> BoxFuture<'_, Result<Box<dyn Session>, DumpError>> {
        Box::pin(async move {
            let pid = match &target {
                AttachTarget::Pid(pid) => *pid,
                AttachTarget::Name(_) => SERVICE_PID,
            };
            if self.fail_attach.lock().unwrap().contains(&pid) {
                return Err(DumpError::Backend(format!("unable to attach to {target}")));
            }
            self.shared.record(format!("attach {pid}"));
            let session: Box<dyn Session> = Box::new(MockSession {
                pid,
                agent: self.agent.clone(),
                shared: self.shared.clone(),
                observer: Mutex::new(None),
            });
            Ok(session)
        })
    }

    fn kill(&self, pid: u32) -> BoxFuture<'_, Result<(), DumpError>> {
        Box::pin(async move {
            self.shared.record(format!("kill {pid}"));
            Ok(())
        })
    }
}

struct MockSession {
    pid: u32,
    agent: Arc<AgentFn>,
    shared: Arc<Shared>,
    observer: Mutex<Option<DetachObserver>>,
}

impl Session for MockSession {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn create_script(&self, _source: String) -> BoxFuture<'_, Result<Box<dyn Script>, DumpError>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let script: Box<dyn Script> = Box::new(MockScript {
                pid: self.pid,
                agent: self.agent.clone(),
                shared: self.shared.clone(),
                handle: AgentHandle { tx },
                rx: Mutex::new(Some(rx)),
            });
            Ok(script)
        })
    }

    fn detach(&self) -> BoxFuture<'_, Result<(), DumpError>> {
        Box::pin(async move {
            self.shared.record(format!("detach {}", self.pid));
            if let Some(observer) = self.observer.lock().unwrap().as_ref() {
                observer(DetachReason::ApplicationRequested, None);
            }
            Ok(())
        })
    }

    fn on_detached(&self, observer: DetachObserver) {
        *self.observer.lock().unwrap() = Some(observer);
    }
}

struct MockScript {
    pid: u32,
    agent: Arc<AgentFn>,
    shared: Arc<Shared>,
    handle: AgentHandle,
    rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
}

impl Outbox for MockScript {
    fn post(&self, message: Value) -> Result<(), DumpError> {
        assert_eq!(message, serde_json::json!({"type": "ack"}));
        self.shared.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Script for MockScript {
    fn load(&self) -> BoxFuture<'_, Result<(), DumpError>> {
        Box::pin(async move {
            self.shared.record(format!("load {}", self.pid));
            Ok(())
        })
    }

    fn unload(&self) -> BoxFuture<'_, Result<(), DumpError>> {
        Box::pin(async move {
            self.shared.record(format!("unload {}", self.pid));
            Ok(())
        })
    }

    fn call(&self, method: String, args: Vec<Value>) -> BoxFuture<'_, Result<Value, DumpError>> {
        Box::pin(async move {
            self.shared.record(format!("call {} {method}", self.pid));
            (self.agent)(self.pid, &method, &args, &self.handle)
        })
    }

    fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.rx.lock().unwrap().take()
    }
}
