//! The `Endpoint`: one RPC runtime instance.
//!
//! An endpoint owns the service registry, middleware pipeline, session
//! table, and transport. The same endpoint can listen and dial at once;
//! client and server are roles of a connection, not of the endpoint.
//! There is no global instance: construct one (or several, in tests) and
//! pass it where it is needed.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::info;

use driftsync_core::{DriftError, Result};

use crate::config::RuntimeConfig;
use crate::middleware::{Middleware, Pipeline};
use crate::registry::{ChainHandler, Service, ServiceRegistry};
use crate::session::{PeerId, SessionManager};
use crate::transport;

/// State shared between the endpoint and its transport tasks.
pub struct RuntimeShared {
    pub(crate) cfg: RuntimeConfig,
    pub(crate) pipeline: Pipeline,
    pub(crate) sessions: SessionManager,
    pub(crate) dispatch_permits: Arc<Semaphore>,
    pub(crate) shutdown: watch::Sender<bool>,
}

/// A bidirectional RPC endpoint.
pub struct Endpoint {
    shared: Arc<RuntimeShared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    pub fn new(cfg: RuntimeConfig) -> Result<Self> {
        cfg.validate()?;
        let registry = Arc::new(ServiceRegistry::new());
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(RuntimeShared {
            sessions: SessionManager::new(cfg.call_timeout()),
            dispatch_permits: Arc::new(Semaphore::new(cfg.max_inflight_dispatch)),
            pipeline: Pipeline::new(registry),
            cfg,
            shutdown,
        });
        Ok(Self {
            shared,
            listener: Mutex::new(None),
        })
    }

    /// Start accepting peers on `addr`. Returns the bound address, which
    /// matters when binding port 0. Listening again replaces the previous
    /// listener; existing sessions are unaffected.
    pub async fn listen(&self, addr: &str) -> Result<SocketAddr> {
        let (local, handle) = transport::listen(Arc::clone(&self.shared), addr).await?;
        if let Some(previous) = lock_ignore_poison(&self.listener).replace(handle) {
            previous.abort();
        }
        Ok(local)
    }

    /// Dial a remote endpoint. The returned peer id names the connection
    /// for all later calls.
    pub async fn connect(&self, url: &str) -> Result<PeerId> {
        transport::connect(Arc::clone(&self.shared), url).await
    }

    /// Close one peer's connection. Pending calls on it fail with
    /// `Disconnected`.
    pub fn disconnect(&self, peer: PeerId) {
        self.shared.sessions.finish(peer, "disconnected locally");
    }

    /// Register every method of `service` under its service name.
    pub fn register_service(&self, service: &dyn Service) {
        self.shared.pipeline.registry().register_service(service);
    }

    /// Register a single continuation-aware handler.
    pub fn register_handler(&self, service: &str, method: &str, handler: ChainHandler) {
        self.shared
            .pipeline
            .registry()
            .register_handler(service, method, handler);
    }

    /// Append a middleware stage to the inbound call pipeline.
    pub fn layer(&self, middleware: Arc<dyn Middleware>) {
        self.shared.pipeline.layer(middleware);
    }

    /// Fire-and-forget call to `peer`. No Response is awaited.
    pub async fn call(
        &self,
        peer: PeerId,
        service: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<()> {
        self.shared.sessions.call(peer, service, method, params).await
    }

    /// Call `peer` and await the Response, bounded by the call timeout.
    pub async fn call_async(
        &self,
        peer: PeerId,
        service: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Option<Value>> {
        self.shared
            .sessions
            .call_async(peer, service, method, params)
            .await
    }

    /// Like `call_async`, deserializing the result into `R`.
    ///
    /// A handler that returned nothing is an error here: the caller
    /// declared it expects a value.
    pub async fn call_async_as<R: DeserializeOwned>(
        &self,
        peer: PeerId,
        service: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<R> {
        let value = self
            .call_async(peer, service, method, params)
            .await?
            .ok_or_else(|| DriftError::Handler("call returned no result".to_owned()))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Blocking variant of `call_async` for non-async call sites.
    ///
    /// Must be called from a worker thread of a multi-thread runtime;
    /// outside any runtime, or on a current-thread runtime (where
    /// `block_in_place` would panic), it fails rather than panicking.
    pub fn call_blocking(
        &self,
        peer: PeerId,
        service: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Option<Value>> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            DriftError::Transport("call_blocking requires a running tokio runtime".to_owned())
        })?;
        if handle.runtime_flavor() != tokio::runtime::RuntimeFlavor::MultiThread {
            return Err(DriftError::Transport(
                "call_blocking requires the multi-thread runtime".to_owned(),
            ));
        }
        tokio::task::block_in_place(|| {
            handle.block_on(self.call_async(peer, service, method, params))
        })
    }

    /// Fire-and-forget to every connected peer matching `predicate`.
    /// Returns how many peers were sent to.
    pub async fn broadcast(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
        predicate: impl Fn(PeerId) -> bool,
    ) -> usize {
        self.shared
            .sessions
            .broadcast(service, method, params, predicate)
            .await
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.shared.sessions.peers()
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.shared.sessions.connected_peers()
    }

    /// Run `hook` whenever a session is torn down, with the peer id and a
    /// human-readable reason.
    pub fn on_disconnect(&self, hook: impl Fn(PeerId, &str) + Send + Sync + 'static) {
        self.shared.sessions.on_disconnect(hook);
    }

    /// Stop the listener and tear down every session.
    pub fn shutdown(&self) {
        info!("endpoint shutting down");
        let _ = self.shared.shutdown.send(true);
        self.shared.dispatch_permits.close();
        if let Some(handle) = lock_ignore_poison(&self.listener).take() {
            handle.abort();
        }
        for peer in self.shared.sessions.peers() {
            self.shared.sessions.finish(peer, "shutting down");
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn call_blocking_refuses_current_thread_runtime() {
        // `#[tokio::test]` runs on a current-thread runtime, where
        // block_in_place would panic; the call must error instead.
        let endpoint = Endpoint::new(RuntimeConfig::default()).unwrap();
        let err = endpoint
            .call_blocking(PeerId(1), "echo", "say", vec![])
            .unwrap_err();
        assert!(matches!(err, DriftError::Transport(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn call_blocking_runs_on_multi_thread_runtime() {
        let endpoint = Endpoint::new(RuntimeConfig::default()).unwrap();
        // Past the flavor check: the unknown peer surfaces as Disconnected.
        let err = endpoint
            .call_blocking(PeerId(1), "echo", "say", vec![])
            .unwrap_err();
        assert!(matches!(err, DriftError::Disconnected));
    }

    #[test]
    fn call_blocking_outside_any_runtime_is_an_error() {
        let endpoint = Endpoint::new(RuntimeConfig::default()).unwrap();
        let err = endpoint
            .call_blocking(PeerId(1), "echo", "say", vec![])
            .unwrap_err();
        assert!(matches!(err, DriftError::Transport(_)));
    }
}
