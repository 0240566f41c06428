//! Shared error type across driftsync crates.

use thiserror::Error;

/// Shared result type.
pub type Result<T> = std::result::Result<T, DriftError>;

/// Reason a transport-level connect attempt failed.
///
/// Surfaced through connection failure callbacks so callers can tell a dead
/// host apart from a slow one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectReason {
    /// The remote host actively refused the connection.
    Refused,
    /// No route to the remote host.
    Unreachable,
    /// The connect deadline elapsed before the handshake completed.
    TimedOut,
    /// The transport handshake itself failed.
    Handshake(String),
}

impl std::fmt::Display for ConnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectReason::Refused => write!(f, "connection refused"),
            ConnectReason::Unreachable => write!(f, "host unreachable"),
            ConnectReason::TimedOut => write!(f, "connect timed out"),
            ConnectReason::Handshake(msg) => write!(f, "handshake failed: {msg}"),
        }
    }
}

/// Unified error type used by the protocol core, runtime, and motion crates.
///
/// The taxonomy is deliberate:
/// - `Decode` is non-fatal and per-message (log and drop).
/// - `UnknownService` / `UnknownMethod` / `Handler` are fatal to one call only
///   and travel back to the caller as an error Response.
/// - `Timeout` is distinguishable from a server-reported `Handler` failure.
/// - `Disconnected` fails every pending call on a peer at once.
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("unknown method: {service}.{method}")]
    UnknownMethod { service: String, method: String },
    #[error("handler error: {0}")]
    Handler(String),
    #[error("call timed out")]
    Timeout,
    #[error("peer disconnected")]
    Disconnected,
    #[error("connect failed: {0}")]
    Connect(ConnectReason),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("channel closed")]
    ChannelClosed,
}

impl DriftError {
    /// Message text carried in an error Response.
    ///
    /// Only the message crosses the wire, never the error value itself.
    pub fn wire_message(&self) -> String {
        match self {
            DriftError::Handler(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this error ends only the call it belongs to.
    ///
    /// Everything except `Disconnected` is local to a single call.
    pub fn is_call_local(&self) -> bool {
        !matches!(self, DriftError::Disconnected)
    }
}
