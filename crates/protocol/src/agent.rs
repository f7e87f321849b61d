//! Messages exchanged with the injected agent script.
//!
//! Every message the agent posts is a [`ScriptMessage`]. Only `send`
//! envelopes carry transfer traffic; their `payload.subject` selects one of
//! the [`AgentPayload`] variants. The host answers `begin` and `data` events
//! with an [`Outbound::Ack`].

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Kind of an inbound script message (`type` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptMessageKind {
    /// Regular `send()` from the agent.
    Send,
    /// Uncaught exception in the agent; the script is going away.
    Error,
    /// Console output forwarded by the engine.
    Log,
    #[serde(other)]
    Unknown,
}

/// Envelope of a message posted by the agent.
///
/// The payload is kept as raw JSON until the subject is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptMessage {
    #[serde(rename = "type")]
    pub kind: ScriptMessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(
        rename = "fileName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub file_name: Option<String>,
    #[serde(
        rename = "lineNumber",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub line_number: Option<u32>,
}

impl ScriptMessage {
    /// Builds a `send` message around the given payload.
    pub fn send<T: Serialize>(payload: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(payload)?;
        Ok(Self {
            kind: ScriptMessageKind::Send,
            payload: Some(RawValue::from_string(json)?),
            description: None,
            stack: None,
            file_name: None,
            line_number: None,
        })
    }

    /// Builds an `error` message with the given description.
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            kind: ScriptMessageKind::Error,
            payload: None,
            description: Some(description.into()),
            stack: None,
            file_name: None,
            line_number: None,
        }
    }

    /// Returns the `payload.subject` field, if present.
    pub fn subject(&self) -> Option<String> {
        let raw = self.payload.as_ref()?;
        serde_json::from_str::<SubjectPeek>(raw.get())
            .ok()
            .and_then(|p| p.subject)
    }

    /// Decodes the payload into an [`AgentPayload`].
    ///
    /// Returns `Ok(None)` when there is no payload or the payload has no
    /// `subject`; unknown subjects decode to [`AgentPayload::Unknown`].
    pub fn agent_payload(&self) -> Result<Option<AgentPayload>, serde_json::Error> {
        let Some(raw) = &self.payload else {
            return Ok(None);
        };
        if self.subject().is_none() {
            return Ok(None);
        }
        serde_json::from_str(raw.get()).map(Some)
    }

    /// Human-readable description of an `error` message.
    pub fn error_summary(&self) -> String {
        let description = self.description.as_deref().unwrap_or("unknown script error");
        match (&self.file_name, self.line_number) {
            (Some(file), Some(line)) => format!("{description} ({file}:{line})"),
            _ => description.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct SubjectPeek {
    subject: Option<String>,
}

/// Transfer traffic, selected by `payload.subject`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subject")]
pub enum AgentPayload {
    #[serde(rename = "memcpy")]
    Memcpy(MemcpyMessage),
    #[serde(rename = "patch")]
    Patch(PatchMessage),
    #[serde(rename = "download")]
    Download(DownloadMessage),
    /// Subjects this host does not understand (newer agents).
    #[serde(other)]
    Unknown,
}

/// Phase of a chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferEvent {
    Begin,
    Data,
    End,
}

/// Anonymous blob transfer (`memcpy`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemcpyMessage {
    pub event: TransferEvent,
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
}

/// Positioned write into an output file, from a blob or zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchMessage {
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub filename: String,
}

/// Named file transfer (`download`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadMessage {
    pub event: TransferEvent,
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<FileStat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// File metadata forwarded from the device.
///
/// Timestamps are milliseconds since the epoch and may carry a fractional
/// part.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    pub mode: u32,
    pub size: u64,
    pub atime_ms: f64,
    pub mtime_ms: f64,
}

/// Messages the host posts to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    /// Flow-control acknowledgment for a `begin` or `data` event.
    Ack,
}
