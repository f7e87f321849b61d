//! One remote session with its injected script and transfer router.

use appdump_protocol::{Outbound, ScriptMessage, ScriptMessageKind};
use appdump_router::{AckSender, Dispatch, RouterStats, TransferRouter};
use appdump_transfer::{PathResolver, ProgressCallback};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::backend::{InboundMessage, Script, Session};
use crate::detach::logging_observer;
use crate::error::DumpError;

/// Pumps agent messages of one session into its router while RPC calls are
/// in flight.
///
/// Messages are only consumed inside [`call`](Self::call): the agent's
/// traffic is a side effect of the RPC it is answering, and the receiver is
/// drained once the result arrives.
pub struct SessionLink {
    label: String,
    session: Box<dyn Session>,
    script: Box<dyn Script>,
    messages: mpsc::UnboundedReceiver<InboundMessage>,
    router: Option<TransferRouter>,
    acks: mpsc::Receiver<Outbound>,
    ack_sender: AckSender,
}

impl SessionLink {
    /// Injects and loads `source` into `session`.
    ///
    /// The session is detached again if the script cannot be set up.
    pub async fn open(
        label: impl Into<String>,
        session: Box<dyn Session>,
        source: &str,
    ) -> Result<Self, DumpError> {
        let label = label.into();
        let pid = session.pid();
        session.on_detached(logging_observer(label.clone(), pid));

        let (script, messages) = match Self::load_script(session.as_ref(), source).await {
            Ok(loaded) => loaded,
            Err(e) => {
                if let Err(detach_err) = session.detach().await {
                    warn!(session = %label, pid, error = %detach_err, "detach after failed load");
                }
                return Err(e);
            }
        };
        debug!(session = %label, pid, "script loaded");

        let (ack_sender, acks) = AckSender::channel();
        Ok(Self {
            label,
            session,
            script,
            messages,
            router: None,
            acks,
            ack_sender,
        })
    }

    async fn load_script(
        session: &dyn Session,
        source: &str,
    ) -> Result<(Box<dyn Script>, mpsc::UnboundedReceiver<InboundMessage>), DumpError> {
        let script = session.create_script(source.to_string()).await?;
        let messages = script
            .take_messages()
            .ok_or_else(|| DumpError::Backend("script messages already taken".into()))?;
        script.load().await?;
        Ok((script, messages))
    }

    /// Creates the router receiving this session's transfers.
    pub fn bind_router(&mut self, resolver: PathResolver) -> &mut TransferRouter {
        debug!(
            session = %self.label,
            root = %resolver.root().display(),
            working_dir = %resolver.working_dir().display(),
            "router bound"
        );
        self.router
            .insert(TransferRouter::new(resolver, self.ack_sender.clone()))
    }

    /// Registers a progress callback on the bound router.
    pub fn on_progress(&mut self, callback: ProgressCallback) {
        if let Some(router) = &mut self.router {
            router.on_progress(callback);
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> u32 {
        self.session.pid()
    }

    pub fn stats(&self) -> Option<RouterStats> {
        self.router.as_ref().map(TransferRouter::stats)
    }

    /// Calls an exported agent method, routing the agent's messages until
    /// the result arrives.
    ///
    /// The call is abandoned on the first protocol error, agent `error`
    /// message or ack that cannot be posted.
    pub async fn call(
        &mut self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, DumpError> {
        let Self {
            label,
            script,
            messages,
            router,
            acks,
            ..
        } = self;
        let label = label.as_str();
        let script: &dyn Script = &**script;

        debug!(session = %label, method, "rpc call");
        let call = script.call(method.to_string(), args);
        tokio::pin!(call);

        let mut messages_open = true;
        let value = loop {
            tokio::select! {
                biased;

                Some(ack) = acks.recv() => forward(label, script, ack)?,

                inbound = messages.recv(), if messages_open => match inbound {
                    Some(inbound) => route(label, router.as_mut(), inbound).await?,
                    None => {
                        trace!(session = %label, "message stream closed");
                        messages_open = false;
                    }
                },

                result = &mut call => break result?,
            }
        };

        while let Ok(inbound) = messages.try_recv() {
            route(label, router.as_mut(), inbound).await?;
            while let Ok(ack) = acks.try_recv() {
                forward(label, script, ack)?;
            }
        }
        while let Ok(ack) = acks.try_recv() {
            forward(label, script, ack)?;
        }

        trace!(session = %label, method, "rpc returned");
        Ok(value)
    }

    /// Unloads the script and detaches. Failures are logged, not returned.
    pub async fn teardown(self) -> Option<RouterStats> {
        let stats = self.stats();
        if let Some(stats) = &stats {
            if stats.blobs_open > 0 || stats.files_open > 0 {
                warn!(
                    session = %self.label,
                    blobs = stats.blobs_open,
                    files = stats.files_open,
                    "transfers still open at teardown"
                );
            }
            debug!(
                session = %self.label,
                files = stats.files_written,
                patches = stats.patches_applied,
                bytes = stats.bytes_written,
                "transfer summary"
            );
        }

        if let Err(e) = self.script.unload().await {
            warn!(session = %self.label, error = %e, "failed to unload script");
        }
        if let Err(e) = self.session.detach().await {
            warn!(session = %self.label, error = %e, "failed to detach");
        }
        stats
    }
}

async fn route(
    label: &str,
    router: Option<&mut TransferRouter>,
    inbound: InboundMessage,
) -> Result<(), DumpError> {
    let InboundMessage { message, data } = inbound;
    let outcome = match router {
        Some(router) => router.dispatch(message, data).await?,
        None => unrouted(label, &message),
    };
    match outcome {
        Dispatch::Detaching(summary) => {
            error!(session = %label, error = %summary, "agent error");
            Err(DumpError::ScriptError(summary))
        }
        Dispatch::Handled | Dispatch::Ignored => Ok(()),
    }
}

/// Handling for sessions without a router (the bypass session).
fn unrouted(label: &str, message: &ScriptMessage) -> Dispatch {
    match message.kind {
        ScriptMessageKind::Error => Dispatch::Detaching(message.error_summary()),
        ScriptMessageKind::Log => {
            debug!(session = %label, payload = ?message.payload.as_ref().map(|p| p.get()), "agent log");
            Dispatch::Ignored
        }
        _ => {
            trace!(session = %label, subject = ?message.subject(), "no router bound, ignoring");
            Dispatch::Ignored
        }
    }
}

/// Posts an ack to the agent. A lost ack would stall the agent's
/// transfer, so a failed post aborts the call.
fn forward(label: &str, script: &dyn Script, ack: Outbound) -> Result<(), DumpError> {
    let value = serde_json::to_value(ack)?;
    script.post(value).inspect_err(|e| {
        error!(session = %label, error = %e, "failed to post ack");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::backend::{BoxFuture, DetachObserver, Device, Outbox};
    use crate::mock::{MockDevice, ok};
    use appdump_protocol::AttachTarget;
    use serde_json::json;

    #[tokio::test]
    async fn call_routes_messages_and_acks() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new(|_pid, method, _args, agent| {
            if method == "dump" {
                agent.send(json!({"subject": "memcpy", "event": "begin", "session": "b", "size": 3}));
                agent.send_data(json!({"subject": "memcpy", "event": "data", "session": "b", "index": 1}), b"abc");
                agent.send(json!({"subject": "patch", "offset": 0, "blob": "b", "filename": "bin"}));
            }
            ok(json!(null))
        });

        let session = device.attach(AttachTarget::Pid(10)).await.unwrap();
        let mut link = SessionLink::open("main", session, "agent").await.unwrap();
        link.bind_router(PathResolver::new("/app/Demo.app", dir.path()));
        link.call("dump", vec![]).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("bin")).unwrap(), b"abc");
        assert_eq!(device.acks(), 2);

        let stats = link.teardown().await.unwrap();
        assert_eq!(stats.patches_applied, 1);
        assert!(device.log().contains(&"unload 10".to_string()));
        assert!(device.log().contains(&"detach 10".to_string()));
    }

    /// Agent that sends one message at a time and, for chunked events,
    /// waits for the host's ack before sending the next one.
    struct StopAndWaitScript {
        steps: Vec<(serde_json::Value, Option<&'static [u8]>)>,
        tx: mpsc::UnboundedSender<InboundMessage>,
        rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
        acked: mpsc::UnboundedSender<()>,
        acks: tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>,
        reject_posts: bool,
    }

    impl StopAndWaitScript {
        fn new(steps: Vec<(serde_json::Value, Option<&'static [u8]>)>) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let (acked, acks) = mpsc::unbounded_channel();
            Self {
                steps,
                tx,
                rx: std::sync::Mutex::new(Some(rx)),
                acked,
                acks: tokio::sync::Mutex::new(acks),
                reject_posts: false,
            }
        }
    }

    fn expects_ack(payload: &serde_json::Value) -> bool {
        matches!(payload["event"].as_str(), Some("begin" | "data"))
    }

    impl Outbox for StopAndWaitScript {
        fn post(&self, message: serde_json::Value) -> Result<(), DumpError> {
            assert_eq!(message, json!({"type": "ack"}));
            if self.reject_posts {
                return Err(DumpError::Backend("write queue full".into()));
            }
            let _ = self.acked.send(());
            Ok(())
        }
    }

    impl Script for StopAndWaitScript {
        fn load(&self) -> BoxFuture<'_, Result<(), DumpError>> {
            Box::pin(async { Ok(()) })
        }

        fn unload(&self) -> BoxFuture<'_, Result<(), DumpError>> {
            Box::pin(async { Ok(()) })
        }

        fn call(
            &self,
            _method: String,
            _args: Vec<serde_json::Value>,
        ) -> BoxFuture<'_, Result<serde_json::Value, DumpError>> {
            Box::pin(async move {
                let mut acks = self.acks.lock().await;
                for (payload, data) in &self.steps {
                    let message = ScriptMessage::send(payload)?;
                    let _ = self
                        .tx
                        .send(InboundMessage::new(message, data.map(<[u8]>::to_vec)));
                    if expects_ack(payload) {
                        tokio::time::timeout(Duration::from_secs(5), acks.recv())
                            .await
                            .map_err(|_| DumpError::Backend(format!("no ack for {payload}")))?;
                    }
                }
                Ok(json!("ok"))
            })
        }

        fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
            self.rx.lock().unwrap().take()
        }
    }

    struct SingleScriptSession(std::sync::Mutex<Option<Box<dyn Script>>>);

    impl Session for SingleScriptSession {
        fn pid(&self) -> u32 {
            7
        }

        fn create_script(&self, _source: String) -> BoxFuture<'_, Result<Box<dyn Script>, DumpError>> {
            Box::pin(async move {
                self.0
                    .lock()
                    .unwrap()
                    .take()
                    .ok_or_else(|| DumpError::Backend("script already created".into()))
            })
        }

        fn detach(&self) -> BoxFuture<'_, Result<(), DumpError>> {
            Box::pin(async { Ok(()) })
        }

        fn on_detached(&self, _observer: DetachObserver) {}
    }

    #[tokio::test]
    async fn acks_are_forwarded_while_the_call_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let stat = json!({"mode": 0o100644, "size": 4, "atimeMs": 0, "mtimeMs": 0});
        let script: Box<dyn Script> = Box::new(StopAndWaitScript::new(vec![
            (json!({"subject": "memcpy", "event": "begin", "session": "b", "size": 4}), None),
            (json!({"subject": "download", "event": "begin", "session": "f", "filename": "/app/Demo.app/f.bin", "stat": stat}), None),
            (json!({"subject": "memcpy", "event": "data", "session": "b", "index": 1}), Some(b"bc")),
            (json!({"subject": "download", "event": "data", "session": "f"}), Some(b"12")),
            (json!({"subject": "memcpy", "event": "data", "session": "b", "index": 2}), Some(b"de")),
            (json!({"subject": "download", "event": "data", "session": "f"}), Some(b"34")),
            (json!({"subject": "download", "event": "end", "session": "f"}), None),
            (json!({"subject": "memcpy", "event": "end", "session": "b"}), None),
            (json!({"subject": "patch", "offset": 2, "blob": "b", "filename": "b.bin"}), None),
        ]));
        let session: Box<dyn Session> =
            Box::new(SingleScriptSession(std::sync::Mutex::new(Some(script))));

        let mut link = SessionLink::open("main", session, "agent").await.unwrap();
        link.bind_router(PathResolver::new("/app/Demo.app", dir.path()));
        assert_eq!(link.call("dump", vec![]).await.unwrap(), json!("ok"));

        assert_eq!(std::fs::read(dir.path().join("f.bin")).unwrap(), b"1234");
        assert_eq!(std::fs::read(dir.path().join("b.bin")).unwrap(), b"\0\0bcde");
        let stats = link.stats().unwrap();
        assert_eq!((stats.files_open, stats.blobs_open), (0, 0));
    }

    #[tokio::test]
    async fn unpostable_ack_aborts_call() {
        let mut script = StopAndWaitScript::new(vec![(
            json!({"subject": "memcpy", "event": "begin", "session": "b", "size": 4}),
            None,
        )]);
        script.reject_posts = true;
        let script: Box<dyn Script> = Box::new(script);
        let session: Box<dyn Session> =
            Box::new(SingleScriptSession(std::sync::Mutex::new(Some(script))));

        let dir = tempfile::tempdir().unwrap();
        let mut link = SessionLink::open("main", session, "agent").await.unwrap();
        link.bind_router(PathResolver::new("/app/Demo.app", dir.path()));

        let err = link.call("dump", vec![]).await.unwrap_err();
        assert!(matches!(err, DumpError::Backend(ref s) if s.contains("queue full")));
    }

    #[tokio::test]
    async fn agent_error_aborts_call() {
        let device = MockDevice::new(|_pid, _method, _args, agent| {
            agent.error("TypeError: x is undefined");
            ok(json!(1))
        });
        let session = device.attach(AttachTarget::Pid(10)).await.unwrap();
        let mut link = SessionLink::open("main", session, "agent").await.unwrap();

        let err = link.call("prepare", vec![]).await.unwrap_err();
        assert!(matches!(err, DumpError::ScriptError(ref s) if s.contains("TypeError")));
    }

    #[tokio::test]
    async fn protocol_error_aborts_call() {
        let dir = tempfile::tempdir().unwrap();
        let device = MockDevice::new(|_pid, _method, _args, agent| {
            agent.send_data(json!({"subject": "download", "event": "data", "session": "nope"}), b"x");
            ok(json!(null))
        });
        let session = device.attach(AttachTarget::Pid(10)).await.unwrap();
        let mut link = SessionLink::open("main", session, "agent").await.unwrap();
        link.bind_router(PathResolver::new("/app/Demo.app", dir.path()));

        let err = link.call("dump", vec![]).await.unwrap_err();
        assert!(matches!(err, DumpError::Router(_)));
    }

    #[tokio::test]
    async fn transfers_are_ignored_without_router() {
        let device = MockDevice::new(|_pid, _method, _args, agent| {
            agent.send(json!({"subject": "memcpy", "event": "begin", "session": "b", "size": 3}));
            ok(json!(0))
        });
        let session = device.attach(AttachTarget::Name("pkd".into())).await.unwrap();
        let mut link = SessionLink::open("bypass", session, "agent").await.unwrap();

        assert_eq!(link.call("bypass", vec![json!(10)]).await.unwrap(), json!(0));
        assert_eq!(device.acks(), 0);
        assert!(link.stats().is_none());
    }
}
