//! driftsync runtime library entry.
//!
//! This crate wires the wire protocol, service registry, middleware
//! pipeline, session table, and WebSocket transport into a bidirectional
//! RPC endpoint, and bridges it to the motion reconciliation engine. It is
//! consumed by embedding applications and by integration tests.

pub mod config;
pub mod endpoint;
pub mod middleware;
pub mod registry;
pub mod services;
pub mod session;
pub mod transport;

pub use config::RuntimeConfig;
pub use endpoint::Endpoint;
pub use middleware::{CallContext, Middleware, NextStage, Pipeline};
pub use registry::{
    chain_handler, plain_handler, ChainHandler, MethodTable, Next, PlainHandler, Service,
    ServiceRegistry,
};
pub use session::{PeerId, SessionState};
