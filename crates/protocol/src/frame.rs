//! Binary framing: 4-byte big-endian header length + JSON header + raw payload.
//!
//! Used by the bridge for script messages that carry a data buffer.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::constants::MAX_FRAME_SIZE;

/// Encodes a header and payload into a single frame.
///
/// Wire format: `[4 bytes: header_len (big-endian)][header_len bytes: JSON][rest: payload]`
pub fn encode_frame<T: Serialize>(header: &T, payload: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = header_json.len() as u32;

    let mut buf = Vec::with_capacity(4 + header_json.len() + payload.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Splits a frame into its decoded header and raw payload.
pub fn decode_frame<T: DeserializeOwned>(data: &[u8]) -> Result<(T, Vec<u8>), FrameError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(data.len()));
    }
    if data.len() < 4 {
        return Err(FrameError::TooShort);
    }

    let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if data.len() - 4 < header_len {
        return Err(FrameError::HeaderTruncated {
            expected: header_len,
            got: data.len() - 4,
        });
    }

    let header_bytes = &data[4..4 + header_len];
    let header: T =
        serde_json::from_slice(header_bytes).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
    Ok((header, data[4 + header_len..].to_vec()))
}

/// Errors from frame decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short (need at least 4 bytes)")]
    TooShort,

    #[error("frame too large ({0} bytes)")]
    TooLarge(usize),

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),
}
