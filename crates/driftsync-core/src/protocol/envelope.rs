//! Request/Response envelope encoding (panic-free).
//!
//! Framing rules:
//! - Never index (`buf[0]`) — always use `Buf` and `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.
//! - `peek_kind` inspects only the tag byte so routing never pays full
//!   deserialization cost for a frame it may drop.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};

/// Type tag for a Request frame.
pub const TAG_REQUEST: u8 = 0x01;
/// Type tag for a Response frame.
pub const TAG_RESPONSE: u8 = 0x02;

/// Frame kind as seen by `peek_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    /// Tag byte missing or not a known tag.
    Unknown,
}

/// A correlated call request.
///
/// `correlation_id` is unique per originating peer while the call is pending;
/// it is free for reuse once the matching completion leaves the pending set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub correlation_id: u32,
    pub service: String,
    pub method: String,
    /// Positional parameters, serialized without a tag of their own.
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

/// The reply to a `WireRequest` with the same correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub correlation_id: u32,
    pub ok: bool,
    /// Present on success (a handler may legitimately return nothing).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Present on failure: the handler's error text, never a payload.
    #[serde(default)]
    pub error: Option<String>,
}

impl WireResponse {
    pub fn success(correlation_id: u32, result: Option<serde_json::Value>) -> Self {
        Self {
            correlation_id,
            ok: true,
            result,
            error: None,
        }
    }

    pub fn failure(correlation_id: u32, error: String) -> Self {
        Self {
            correlation_id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Inspect only the tag byte. Empty input is `Unknown`, not an error.
pub fn peek_kind(buf: &[u8]) -> MessageKind {
    match buf.first() {
        Some(&TAG_REQUEST) => MessageKind::Request,
        Some(&TAG_RESPONSE) => MessageKind::Response,
        _ => MessageKind::Unknown,
    }
}

/// Encode a Request frame: `[0x01][json body]`.
pub fn encode_request(req: &WireRequest) -> Result<Bytes> {
    encode_tagged(TAG_REQUEST, req)
}

/// Encode a Response frame: `[0x02][json body]`.
pub fn encode_response(resp: &WireResponse) -> Result<Bytes> {
    encode_tagged(TAG_RESPONSE, resp)
}

/// Decode a Request frame, validating the tag first.
pub fn decode_request(buf: Bytes) -> Result<WireRequest> {
    decode_tagged(buf, TAG_REQUEST, "request")
}

/// Decode a Response frame, validating the tag first.
pub fn decode_response(buf: Bytes) -> Result<WireResponse> {
    decode_tagged(buf, TAG_RESPONSE, "response")
}

fn encode_tagged<T: Serialize>(tag: u8, body: &T) -> Result<Bytes> {
    let json = serde_json::to_vec(body)?;
    let mut out = BytesMut::with_capacity(1 + json.len());
    out.put_u8(tag);
    out.put_slice(&json);
    Ok(out.freeze())
}

fn decode_tagged<T: for<'de> Deserialize<'de>>(mut buf: Bytes, want: u8, label: &str) -> Result<T> {
    if buf.remaining() < 1 {
        return Err(DriftError::Decode(format!("{label} frame too short")));
    }
    let tag = buf.get_u8();
    if tag != want {
        return Err(DriftError::Decode(format!(
            "{label} tag mismatch: got 0x{tag:02x}, want 0x{want:02x}"
        )));
    }
    serde_json::from_slice(&buf)
        .map_err(|e| DriftError::Decode(format!("invalid {label} body: {e}")))
}
