//! Wire protocol: type-tagged envelope framing.
//!
//! Every top-level frame is `[1-byte type tag][serialized body]`. Parameter
//! arrays embedded inside a Request body carry no tag of their own; they are
//! not top-level protocol messages.
//!
//! All parsers are panic-free: malformed input is reported as
//! `DriftError::Decode` instead of panicking or indexing raw buffers, so a
//! hostile or truncated frame costs one dropped message, never the session.

pub mod envelope;

pub use envelope::{
    decode_request, decode_response, encode_request, encode_response, peek_kind, MessageKind,
    WireRequest, WireResponse, TAG_REQUEST, TAG_RESPONSE,
};
