//! Transport layer: WebSocket listener, outbound connector, session loop.

pub mod ws;

pub use ws::{connect, listen};
