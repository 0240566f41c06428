//! driftsync core: transport-agnostic protocol primitives and error types.
//!
//! This crate defines the wire envelope and error surface shared by the RPC
//! runtime and the motion reconciliation engine. It intentionally carries no
//! transport or runtime dependencies so it can be reused in multiple contexts.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `DriftError`/`Result` so a malformed
//! frame from a remote peer can never crash the process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ConnectReason, DriftError, Result};
