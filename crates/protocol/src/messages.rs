//! Request/response payloads of the bridge protocol.

use serde::{Deserialize, Serialize};

use crate::agent::ScriptMessage;
use crate::types::{ApplicationInfo, AttachTarget, CrashReport, DetachReason};

/// `enumerate_applications` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationsResponse {
    pub applications: Vec<ApplicationInfo>,
}

/// `spawn` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub identifier: String,
}

/// Request or response carrying just a process id (`spawn`, `resume`, `kill`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidPayload {
    pub pid: u32,
}

/// `attach` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachRequest {
    pub target: AttachTarget,
}

/// `attach` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachResponse {
    pub session: String,
    /// Pid of the attached process; resolved by the bridge for name targets.
    pub pid: u32,
}

/// Request addressing an existing session (`detach`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session: String,
}

/// `create_script` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScriptRequest {
    pub session: String,
    pub source: String,
}

/// `create_script` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScriptResponse {
    pub script: String,
}

/// Request addressing an existing script (`load_script`, `unload_script`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub script: String,
}

/// `call` request: invoke an exported agent function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub script: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// `call` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    #[serde(default)]
    pub value: serde_json::Value,
}

/// `post` request: deliver a message to the agent. Never answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRequest {
    pub script: String,
    pub message: serde_json::Value,
}

/// `message` push event.
///
/// When the agent attached a data buffer, the whole `message` envelope is
/// sent as the header of a binary frame and the buffer follows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptMessageEvent {
    pub script: String,
    pub message: ScriptMessage,
}

/// `detached` push event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachedEvent {
    pub session: String,
    pub reason: DetachReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash: Option<CrashReport>,
}
