//! WebSocket transport.
//!
//! Responsibilities:
//! - Accept inbound connections and dial outbound ones
//! - Drive one `run_session` loop per peer: outbound writer, inbound
//!   router, ping/idle timers, dispatch task reaping
//! - Route frames by tag byte only; a frame that fails to decode is
//!   logged and dropped, never fatal to the session
//!
//! Request dispatch runs on spawned tasks bounded by the shared dispatch
//! semaphore, so a slow handler cannot stall the read loop. Responses are
//! resolved inline against the pending-call table (cheap, no handler runs).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use driftsync_core::protocol::{
    decode_request, decode_response, encode_response, peek_kind, MessageKind, WireResponse,
};
use driftsync_core::{ConnectReason, DriftError, Result};

use crate::endpoint::RuntimeShared;
use crate::middleware::CallContext;
use crate::session::{OutboundFrame, PeerId, Session, SessionState};

/// Bind a listener and start accepting peers in a background task.
///
/// Returns the bound address (useful with port 0) and the accept-loop
/// handle. The loop exits when the shared shutdown signal flips.
pub async fn listen(
    shared: Arc<RuntimeShared>,
    addr: &str,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| DriftError::Transport(format!("bind {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| DriftError::Transport(format!("local_addr: {e}")))?;
    info!(%local, "listening");

    let mut shutdown_rx = shared.shutdown.subscribe();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(%err, "accept failed");
                            continue;
                        }
                    };
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(socket) => {
                                let (session, out_rx) = new_session(
                                    &shared,
                                    peer_addr.to_string(),
                                    SessionState::Connected,
                                );
                                info!(peer = %session.peer(), %peer_addr, "peer accepted");
                                shared.sessions.insert(Arc::clone(&session));
                                run_session(shared, session, socket, out_rx).await;
                            }
                            Err(err) => {
                                debug!(%peer_addr, %err, "websocket handshake failed");
                            }
                        }
                    });
                }
            }
        }
    });

    Ok((local, handle))
}

/// Dial `url` and start the session loop for the new peer.
///
/// The whole attempt, TCP connect and WebSocket handshake included, is
/// bounded by the configured connect timeout. Failures are classified so
/// callers can tell a dead host from a slow one.
pub async fn connect(shared: Arc<RuntimeShared>, url: &str) -> Result<PeerId> {
    // The session exists (Connecting) for the duration of the dial but only
    // enters the table once the handshake succeeds, so a failed attempt
    // never runs disconnect hooks.
    let (session, out_rx) = new_session(&shared, url.to_owned(), SessionState::Connecting);
    let peer = session.peer();

    let attempt = tokio::time::timeout(
        shared.cfg.connect_timeout(),
        tokio_tungstenite::connect_async(url),
    )
    .await;

    let socket = match attempt {
        Ok(Ok((socket, _response))) => socket,
        Ok(Err(err)) => return Err(DriftError::Connect(classify_connect_error(&err))),
        Err(_) => return Err(DriftError::Connect(ConnectReason::TimedOut)),
    };

    session.set_state(SessionState::Connected);
    info!(%peer, url, "connected");
    shared.sessions.insert(Arc::clone(&session));
    tokio::spawn(run_session(shared, session, socket, out_rx));
    Ok(peer)
}

fn new_session(
    shared: &Arc<RuntimeShared>,
    addr: String,
    state: SessionState,
) -> (Arc<Session>, mpsc::Receiver<OutboundFrame>) {
    let peer = shared.sessions.allocate_peer();
    let (out_tx, out_rx) = mpsc::channel(shared.cfg.outbound_queue_depth);
    (Arc::new(Session::new(peer, addr, out_tx, state)), out_rx)
}

fn classify_connect_error(err: &WsError) -> ConnectReason {
    match err {
        WsError::Io(io) => match io.kind() {
            std::io::ErrorKind::ConnectionRefused => ConnectReason::Refused,
            std::io::ErrorKind::TimedOut => ConnectReason::TimedOut,
            _ => ConnectReason::Unreachable,
        },
        other => ConnectReason::Handshake(other.to_string()),
    }
}

/// Core per-peer loop. Owns both socket halves; everything else talks to
/// the session through its outbound channel or the pending-call table.
async fn run_session<S>(
    shared: Arc<RuntimeShared>,
    session: Arc<Session>,
    socket: WebSocketStream<S>,
    mut out_rx: mpsc::Receiver<OutboundFrame>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = session.peer();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut ping_tick = tokio::time::interval(shared.cfg.heartbeat_interval());
    ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut idle_tick = tokio::time::interval(Duration::from_millis(250));
    idle_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut shutdown_rx = shared.shutdown.subscribe();
    session.touch();

    let reason = loop {
        tokio::select! {
            maybe_out = out_rx.recv() => {
                match maybe_out {
                    Some(OutboundFrame::Data(bytes)) => {
                        if ws_tx.send(Message::Binary(bytes.to_vec())).await.is_err() {
                            break "write failed";
                        }
                    }
                    Some(OutboundFrame::Close) | None => break "closed locally",
                }
            }

            incoming = ws_rx.next() => {
                let Some(incoming) = incoming else { break "connection closed"; };
                let Ok(msg) = incoming else { break "read failed"; };
                session.touch();
                match msg {
                    Message::Binary(data) => {
                        route_frame(&shared, &session, Bytes::from(data), &mut tasks);
                    }
                    Message::Ping(payload) => {
                        let _ = ws_tx.send(Message::Pong(payload)).await;
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break "peer closed",
                    Message::Text(_) => {
                        debug!(%peer, "text frame on binary protocol, dropping");
                    }
                    Message::Frame(_) => {}
                }
            }

            _ = session.closed() => break "finished",
            _ = shutdown_rx.changed() => break "shutting down",

            _ = ping_tick.tick() => {
                let _ = ws_tx.send(Message::Ping(Vec::new())).await;
            }

            _ = idle_tick.tick() => {
                if session.idle_for() >= shared.cfg.idle_timeout() {
                    break "idle timeout";
                }
            }

            // Reap finished dispatch tasks; guard keeps the arm out of the
            // select when the set is empty (join_next would resolve None).
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    };

    let _ = ws_tx.send(Message::Close(None)).await;
    // Tear the session down before draining: closing the outbound channel
    // and marking the peer Disconnected unparks any dispatch task blocked
    // in `send_frame` on a full queue, so the drain below cannot hang.
    drop(out_rx);
    shared.sessions.finish(peer, reason);
    while tasks.join_next().await.is_some() {}
    debug!(%peer, reason, "session loop ended");
}

/// Tag-byte routing. Requests are dispatched on tracked tasks under the
/// shared concurrency bound; Responses resolve pending calls inline.
fn route_frame(
    shared: &Arc<RuntimeShared>,
    session: &Arc<Session>,
    frame: Bytes,
    tasks: &mut JoinSet<()>,
) {
    match peek_kind(&frame) {
        MessageKind::Request => {
            let shared = Arc::clone(shared);
            let session = Arc::clone(session);
            tasks.spawn(async move {
                let permit = match Arc::clone(&shared.dispatch_permits).acquire_owned().await {
                    Ok(permit) => permit,
                    // Semaphore closed on shutdown.
                    Err(_) => return,
                };
                handle_request(&shared, &session, frame).await;
                drop(permit);
            });
        }
        MessageKind::Response => match decode_response(frame) {
            Ok(response) => shared.sessions.handle_response(session.peer(), response),
            Err(err) => debug!(peer = %session.peer(), %err, "bad response frame, dropping"),
        },
        MessageKind::Unknown => {
            debug!(peer = %session.peer(), "unknown frame tag, dropping");
        }
    }
}

/// Decode, run the pipeline, and send the Response back. Every failure
/// past decode travels back to the caller as an error Response carrying
/// only the error text.
async fn handle_request(shared: &Arc<RuntimeShared>, session: &Arc<Session>, frame: Bytes) {
    let peer = session.peer();
    let request = match decode_request(frame) {
        Ok(request) => request,
        Err(err) => {
            debug!(%peer, %err, "bad request frame, dropping");
            return;
        }
    };
    let correlation_id = request.correlation_id;

    let ctx = CallContext::new(request.service, request.method, request.params, peer);
    let response = match shared.pipeline.execute(ctx).await {
        Ok(ctx) => WireResponse::success(correlation_id, ctx.result),
        Err(err) => {
            debug!(%peer, correlation_id, %err, "call failed");
            WireResponse::failure(correlation_id, err.wire_message())
        }
    };

    match encode_response(&response) {
        Ok(bytes) => {
            if let Err(err) = session.send_frame(bytes).await {
                debug!(%peer, correlation_id, %err, "response send failed");
            }
        }
        Err(err) => warn!(%peer, correlation_id, %err, "response encode failed"),
    }
}
