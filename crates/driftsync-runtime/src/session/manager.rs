//! Session table and the correlation-id call path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use driftsync_core::protocol::{encode_request, WireRequest, WireResponse};
use driftsync_core::{DriftError, Result};

use super::{PeerId, Session, SessionState};

type DisconnectHook = Arc<dyn Fn(PeerId, &str) + Send + Sync>;

/// Owns every live session and drives the request/response correlation
/// protocol on top of them.
pub struct SessionManager {
    sessions: DashMap<PeerId, Arc<Session>>,
    next_peer: AtomicU64,
    call_timeout: Duration,
    disconnect_hooks: Mutex<Vec<DisconnectHook>>,
}

impl SessionManager {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            next_peer: AtomicU64::new(1),
            call_timeout,
            disconnect_hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn allocate_peer(&self) -> PeerId {
        PeerId(self.next_peer.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.peer(), session);
    }

    pub fn get(&self, peer: PeerId) -> Option<Arc<Session>> {
        self.sessions.get(&peer).map(|s| Arc::clone(s.value()))
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.sessions
            .iter()
            .filter(|e| e.value().state() == SessionState::Connected)
            .map(|e| *e.key())
            .collect()
    }

    /// Register a hook run after each session is torn down.
    pub fn on_disconnect(&self, hook: impl Fn(PeerId, &str) + Send + Sync + 'static) {
        lock_ignore_poison(&self.disconnect_hooks).push(Arc::new(hook));
    }

    /// Tear a session down: remove it from the table, fail its pending
    /// calls, wake its transport loop, and run disconnect hooks. Idempotent;
    /// later calls for the same peer are no-ops.
    pub fn finish(&self, peer: PeerId, reason: &str) {
        let Some((_, session)) = self.sessions.remove(&peer) else {
            return;
        };
        info!(%peer, reason, "session finished");
        session.set_state(SessionState::Disconnected);
        session.fail_all_pending();
        session.request_close();

        let hooks: Vec<DisconnectHook> =
            lock_ignore_poison(&self.disconnect_hooks).iter().cloned().collect();
        for hook in hooks {
            hook(peer, reason);
        }
    }

    /// Call `service.method` on `peer` and await its Response, bounded by
    /// the configured call timeout. A timed-out or disconnected call leaves
    /// no entry behind in the pending table.
    pub async fn call_async(
        &self,
        peer: PeerId,
        service: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Option<Value>> {
        let session = self.get(peer).ok_or(DriftError::Disconnected)?;

        let correlation_id = session.next_correlation();
        let request = WireRequest {
            correlation_id,
            service: service.to_owned(),
            method: method.to_owned(),
            params,
        };
        let frame = encode_request(&request)?;

        let (tx, rx) = oneshot::channel();
        session.register_pending(correlation_id, tx);

        if let Err(err) = session.send_frame(frame).await {
            session.take_pending(correlation_id);
            return Err(err);
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without resolving: the session was torn down.
            Ok(Err(_)) => Err(DriftError::Disconnected),
            Err(_) => {
                session.take_pending(correlation_id);
                debug!(%peer, service, method, correlation_id, "call timed out");
                Err(DriftError::Timeout)
            }
        }
    }

    /// Fire-and-forget call: sends the Request and never awaits a Response.
    pub async fn call(
        &self,
        peer: PeerId,
        service: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<()> {
        let session = self.get(peer).ok_or(DriftError::Disconnected)?;
        let request = WireRequest {
            correlation_id: session.next_correlation(),
            service: service.to_owned(),
            method: method.to_owned(),
            params,
        };
        session.send_frame(encode_request(&request)?).await
    }

    /// Fire-and-forget to every connected peer matching `predicate`.
    /// Returns how many peers the frame was queued for.
    pub async fn broadcast(
        &self,
        service: &str,
        method: &str,
        params: Vec<Value>,
        predicate: impl Fn(PeerId) -> bool,
    ) -> usize {
        let mut sent = 0;
        for peer in self.connected_peers() {
            if !predicate(peer) {
                continue;
            }
            match self.call(peer, service, method, params.clone()).await {
                Ok(()) => sent += 1,
                Err(err) => warn!(%peer, service, method, %err, "broadcast send failed"),
            }
        }
        sent
    }

    /// Resolve an inbound Response against the peer's pending table. An
    /// unknown correlation id (late reply after a timeout) is dropped.
    pub fn handle_response(&self, peer: PeerId, response: WireResponse) {
        let Some(session) = self.get(peer) else {
            return;
        };
        let Some(tx) = session.take_pending(response.correlation_id) else {
            debug!(
                %peer,
                correlation_id = response.correlation_id,
                "response without pending call, dropping"
            );
            return;
        };
        let outcome = if response.ok {
            Ok(response.result)
        } else {
            Err(DriftError::Handler(
                response.error.unwrap_or_else(|| "remote call failed".to_owned()),
            ))
        };
        let _ = tx.send(outcome);
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
    use super::*;
    use crate::session::OutboundFrame;
    use tokio::sync::mpsc;

    fn manager_with_session(timeout: Duration) -> (Arc<SessionManager>, PeerId, mpsc::Receiver<OutboundFrame>) {
        let manager = Arc::new(SessionManager::new(timeout));
        let peer = manager.allocate_peer();
        let (tx, rx) = mpsc::channel(16);
        manager.insert(Arc::new(Session::new(
            peer,
            "test:0".into(),
            tx,
            SessionState::Connected,
        )));
        (manager, peer, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out_and_clears_pending() {
        let (manager, peer, _rx) = manager_with_session(Duration::from_secs(5));

        let err = manager
            .call_async(peer, "echo", "ping", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, DriftError::Timeout));

        let session = manager.get(peer).unwrap();
        assert_eq!(session.pending_count(), 0);

        // A late response for the timed-out id is silently dropped.
        manager.handle_response(
            peer,
            WireResponse::success(0, Some(Value::from("late"))),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_fails_every_inflight_call() {
        let (manager, peer, _rx) = manager_with_session(Duration::from_secs(60));

        let mut calls = Vec::new();
        for _ in 0..3 {
            let manager = Arc::clone(&manager);
            calls.push(tokio::spawn(async move {
                manager.call_async(peer, "echo", "ping", vec![]).await
            }));
        }

        // Let every call reach the pending table before tearing down.
        let session = manager.get(peer).unwrap();
        while session.pending_count() < 3 {
            tokio::task::yield_now().await;
        }

        manager.finish(peer, "connection reset");

        for call in calls {
            let err = call.await.unwrap().unwrap_err();
            assert!(matches!(err, DriftError::Disconnected));
        }
    }

    #[tokio::test]
    async fn response_resolves_matching_call() {
        let (manager, peer, _rx) = manager_with_session(Duration::from_secs(5));

        let handle = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager.call_async(peer, "echo", "ping", vec![Value::from("hi")]).await
            })
        };

        let session = manager.get(peer).unwrap();
        while session.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        manager.handle_response(peer, WireResponse::success(0, Some(Value::from("hi"))));
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, Some(Value::from("hi")));
    }

    #[tokio::test]
    async fn error_response_surfaces_handler_error() {
        let (manager, peer, _rx) = manager_with_session(Duration::from_secs(5));

        let handle = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager.call_async(peer, "echo", "boom", vec![]).await
            })
        };

        let session = manager.get(peer).unwrap();
        while session.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        manager.handle_response(peer, WireResponse::failure(0, "boom failed".into()));
        let err = handle.await.unwrap().unwrap_err();
        match err {
            DriftError::Handler(text) => assert_eq!(text, "boom failed"),
            other => panic!("expected handler error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finish_runs_hooks_once() {
        let (manager, peer, _rx) = manager_with_session(Duration::from_secs(5));
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen);
            manager.on_disconnect(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }
        manager.finish(peer, "test");
        manager.finish(peer, "test again");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(manager.get(peer).is_none());
    }
}
