//! Peer sessions and the pending-call table.
//!
//! A `Session` is the runtime's view of one connected peer: its outbound
//! frame queue, lifecycle state, heartbeat bookkeeping, and the
//! correlation-id table for calls awaiting a Response. Sessions are shared
//! (`Arc`) between the transport loop, the dispatcher tasks, and callers.

pub mod manager;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::debug;

use driftsync_core::{DriftError, Result};

pub use manager::SessionManager;

/// Runtime-local peer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Peer lifecycle. `Disconnected` is terminal; the session leaves the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Frames queued toward the transport loop.
#[derive(Debug)]
pub enum OutboundFrame {
    Data(Bytes),
    /// Ask the loop to close the connection gracefully.
    Close,
}

pub(crate) type PendingSender = oneshot::Sender<Result<Option<Value>>>;

/// One connected (or connecting) peer.
pub struct Session {
    peer: PeerId,
    addr: String,
    state: Mutex<SessionState>,
    out_tx: mpsc::Sender<OutboundFrame>,
    close: Notify,
    last_heartbeat: Mutex<Instant>,
    next_correlation: AtomicU32,
    pending: DashMap<u32, PendingSender>,
}

impl Session {
    pub(crate) fn new(
        peer: PeerId,
        addr: String,
        out_tx: mpsc::Sender<OutboundFrame>,
        state: SessionState,
    ) -> Self {
        Self {
            peer,
            addr,
            state: Mutex::new(state),
            out_tx,
            close: Notify::new(),
            last_heartbeat: Mutex::new(Instant::now()),
            next_correlation: AtomicU32::new(0),
            pending: DashMap::new(),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn state(&self) -> SessionState {
        *lock_ignore_poison(&self.state)
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *lock_ignore_poison(&self.state) = state;
    }

    /// Next correlation id for this peer. Wrapping is fine: an id is only
    /// reserved while its entry sits in the pending table.
    pub(crate) fn next_correlation(&self) -> u32 {
        self.next_correlation.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue one encoded frame toward the peer.
    pub(crate) async fn send_frame(&self, frame: Bytes) -> Result<()> {
        if self.state() == SessionState::Disconnected {
            return Err(DriftError::Disconnected);
        }
        self.out_tx
            .send(OutboundFrame::Data(frame))
            .await
            .map_err(|_| DriftError::Disconnected)
    }

    pub(crate) fn register_pending(&self, correlation_id: u32, tx: PendingSender) {
        self.pending.insert(correlation_id, tx);
    }

    /// Remove and return the completion for `correlation_id`, if pending.
    pub(crate) fn take_pending(&self, correlation_id: u32) -> Option<PendingSender> {
        self.pending.remove(&correlation_id).map(|(_, tx)| tx)
    }

    /// Fail every pending call on this peer with `Disconnected`.
    pub(crate) fn fail_all_pending(&self) {
        let ids: Vec<u32> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                debug!(peer = %self.peer, correlation_id = id, "cancelling pending call");
                let _ = tx.send(Err(DriftError::Disconnected));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Record inbound activity for idle tracking.
    pub(crate) fn touch(&self) {
        *lock_ignore_poison(&self.last_heartbeat) = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        lock_ignore_poison(&self.last_heartbeat).elapsed()
    }

    /// Ask the transport loop to shut this session down.
    pub(crate) fn request_close(&self) {
        self.close.notify_one();
    }

    /// Resolves once `request_close` has been called.
    pub(crate) async fn closed(&self) {
        self.close.notified().await;
    }
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
