use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::MessageType;

/// Failure the bridge reports for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// One bridge frame: a request, its response, or a push event.
///
/// Requests carry a fresh id that the bridge echoes in the response. Push
/// events (`message`, `detached`) have no id. The payload stays raw until
/// the receiver knows which type to decode it into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Message {
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.into(),
            msg_type,
            payload: payload.map(serde_json::value::to_raw_value).transpose()?,
            error: None,
        })
    }

    /// A frame without id: push events and fire-and-forget posts.
    pub fn event<T: Serialize>(
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        Self::new(String::new(), msg_type, payload)
    }

    pub fn is_event(&self) -> bool {
        self.id.is_empty()
    }

    /// Decodes the payload; `Ok(None)` when there is none.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        self.payload
            .as_deref()
            .map(|raw| serde_json::from_str(raw.get()))
            .transpose()
    }

    /// `result` response to this request.
    pub fn reply<T: Serialize>(&self, payload: Option<&T>) -> Result<Self, serde_json::Error> {
        Self::new(self.id.clone(), MessageType::Result, payload)
    }

    /// `error` response to this request.
    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            msg_type: MessageType::Error,
            payload: None,
            error: Some(RemoteError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Splits a response into its success or the bridge's error.
    ///
    /// An `error` frame without details, or any frame with an `error`
    /// field, counts as a failure.
    pub fn into_result(self) -> Result<Self, RemoteError> {
        match (self.msg_type == MessageType::Error, self.error) {
            (_, Some(err)) => Err(err),
            (true, None) => Err(RemoteError {
                code: 0,
                message: "unspecified bridge error".into(),
            }),
            (false, None) => Ok(Self { error: None, ..self }),
        }
    }
}
