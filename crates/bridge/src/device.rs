//! Session-trait implementations on top of [`BridgeClient`].

use std::sync::{Arc, Mutex, PoisonError};

use appdump_protocol::messages::{
    ApplicationsResponse, AttachRequest, AttachResponse, CallRequest, CallResponse,
    CreateScriptRequest, CreateScriptResponse, PidPayload, PostRequest, ScriptRequest,
    SessionRequest, SpawnRequest,
};
use appdump_protocol::{ApplicationInfo, AttachTarget, MessageType};
use appdump_session::{
    BoxFuture, DetachObserver, Device, DumpError, InboundMessage, Outbox, Script, Session,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::BridgeClient;
use crate::error::BridgeError;

/// The device behind a bridge connection.
pub struct BridgeDevice {
    client: Arc<BridgeClient>,
}

impl BridgeDevice {
    pub fn new(client: Arc<BridgeClient>) -> Self {
        Self { client }
    }

    pub async fn connect(url: &str) -> Result<Self, BridgeError> {
        Ok(Self::new(Arc::new(BridgeClient::connect(url).await?)))
    }

    pub fn client(&self) -> &Arc<BridgeClient> {
        &self.client
    }
}

impl Device for BridgeDevice {
    fn enumerate_applications(&self) -> BoxFuture<'_, Result<Vec<ApplicationInfo>, DumpError>> {
        Box::pin(async move {
            let resp: ApplicationsResponse = self
                .client
                .request_as::<(), _>(MessageType::EnumerateApplications, None)
                .await?;
            Ok(resp.applications)
        })
    }

    fn spawn(&self, identifier: String) -> BoxFuture<'_, Result<u32, DumpError>> {
        Box::pin(async move {
            let resp: PidPayload = self
                .client
                .request_as(MessageType::Spawn, Some(&SpawnRequest { identifier }))
                .await?;
            Ok(resp.pid)
        })
    }

    fn resume(&self, pid: u32) -> BoxFuture<'_, Result<(), DumpError>> {
        Box::pin(async move {
            self.client
                .request(MessageType::Resume, Some(&PidPayload { pid }))
                .await?;
            Ok(())
        })
    }

    fn attach(&self, target: AttachTarget) -> BoxFuture<'_, Result<Box<dyn Session>, DumpError>> {
        Box::pin(async move {
            let resp: AttachResponse = self
                .client
                .request_as(MessageType::Attach, Some(&AttachRequest { target: target.clone() }))
                .await?;
            self.client.routes().add_session(&resp.session);
            debug!(%target, session = %resp.session, pid = resp.pid, "attached");

            let session: Box<dyn Session> = Box::new(BridgeSession {
                client: self.client.clone(),
                id: resp.session,
                pid: resp.pid,
            });
            Ok(session)
        })
    }

    fn kill(&self, pid: u32) -> BoxFuture<'_, Result<(), DumpError>> {
        Box::pin(async move {
            self.client
                .request(MessageType::Kill, Some(&PidPayload { pid }))
                .await?;
            Ok(())
        })
    }
}

/// A bridge-side session.
pub struct BridgeSession {
    client: Arc<BridgeClient>,
    id: String,
    pid: u32,
}

impl BridgeSession {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Session for BridgeSession {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn create_script(&self, source: String) -> BoxFuture<'_, Result<Box<dyn Script>, DumpError>> {
        Box::pin(async move {
            let req = CreateScriptRequest {
                session: self.id.clone(),
                source,
            };
            let resp: CreateScriptResponse = self
                .client
                .request_as(MessageType::CreateScript, Some(&req))
                .await?;
            let messages = self.client.routes().add_script(&resp.script);
            debug!(session = %self.id, script = %resp.script, "script created");

            let script: Box<dyn Script> = Box::new(BridgeScript {
                client: self.client.clone(),
                id: resp.script,
                messages: Mutex::new(Some(messages)),
            });
            Ok(script)
        })
    }

    fn detach(&self) -> BoxFuture<'_, Result<(), DumpError>> {
        Box::pin(async move {
            let req = SessionRequest {
                session: self.id.clone(),
            };
            self.client.request(MessageType::Detach, Some(&req)).await?;
            Ok(())
        })
    }

    fn on_detached(&self, observer: DetachObserver) {
        self.client.routes().set_observer(&self.id, observer);
    }
}

/// A script injected through the bridge.
pub struct BridgeScript {
    client: Arc<BridgeClient>,
    id: String,
    messages: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
}

impl BridgeScript {
    fn request(&self) -> ScriptRequest {
        ScriptRequest {
            script: self.id.clone(),
        }
    }
}

impl Outbox for BridgeScript {
    fn post(&self, message: serde_json::Value) -> Result<(), DumpError> {
        let req = PostRequest {
            script: self.id.clone(),
            message,
        };
        Ok(self.client.post(&req)?)
    }
}

impl Script for BridgeScript {
    fn load(&self) -> BoxFuture<'_, Result<(), DumpError>> {
        Box::pin(async move {
            self.client
                .request(MessageType::LoadScript, Some(&self.request()))
                .await?;
            Ok(())
        })
    }

    fn unload(&self) -> BoxFuture<'_, Result<(), DumpError>> {
        Box::pin(async move {
            let result = self
                .client
                .request(MessageType::UnloadScript, Some(&self.request()))
                .await;
            self.client.routes().remove_script(&self.id);
            result?;
            Ok(())
        })
    }

    fn call(
        &self,
        method: String,
        args: Vec<serde_json::Value>,
    ) -> BoxFuture<'_, Result<serde_json::Value, DumpError>> {
        Box::pin(async move {
            let req = CallRequest {
                script: self.id.clone(),
                method,
                args,
            };
            let resp = self
                .client
                .request_untimed(MessageType::Call, Some(&req))
                .await?;
            let value = resp
                .parse_payload::<CallResponse>()?
                .map(|r| r.value)
                .unwrap_or_default();
            Ok(value)
        })
    }

    fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
