use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum size of a single bridge frame (64 MiB).
///
/// Agent chunks are far smaller; the cap only guards against a peer that
/// announces an absurd header length.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Timeout for bridge control requests (attach, load, detach, ...).
///
/// Agent RPC calls (`call`) are not bounded.
pub const BRIDGE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the system service hosting the validation-bypass session.
pub const DEFAULT_BYPASS_SERVICE: &str = "pkd";

/// Bridge message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from host to bridge
    #[serde(rename = "enumerate_applications")]
    EnumerateApplications,
    #[serde(rename = "spawn")]
    Spawn,
    #[serde(rename = "resume")]
    Resume,
    #[serde(rename = "kill")]
    Kill,
    #[serde(rename = "attach")]
    Attach,
    #[serde(rename = "detach")]
    Detach,
    #[serde(rename = "create_script")]
    CreateScript,
    #[serde(rename = "load_script")]
    LoadScript,
    #[serde(rename = "unload_script")]
    UnloadScript,
    #[serde(rename = "call")]
    Call,
    #[serde(rename = "post")]
    Post,

    // Responses from bridge to host
    #[serde(rename = "result")]
    Result,
    #[serde(rename = "error")]
    Error,

    // Events from bridge to host (push notifications)
    #[serde(rename = "message")]
    ScriptMessage,
    #[serde(rename = "detached")]
    Detached,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Bridge error codes.
pub const ERR_CODE_BAD_REQUEST: i32 = 400;
pub const ERR_CODE_NOT_FOUND: i32 = 404;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&MessageType::EnumerateApplications).unwrap(),
            "\"enumerate_applications\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::ScriptMessage).unwrap(),
            "\"message\""
        );
    }

    #[test]
    fn unknown_message_type_is_tolerated() {
        let t: MessageType = serde_json::from_str("\"heartbeat\"").unwrap();
        assert_eq!(t, MessageType::Unknown);
    }
}
