//! HTTP and WebSocket endpoints.
//!
//! `/ws` is the message-protocol transport: every text frame from a client is
//! one inbound envelope, and every outbound broadcast plus every reply is sent
//! back as a text frame.

use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use reelproto::{Envelope, Inbound, Outbound, Reply, StatusReport, TargetId};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::recorder::Recorder;
use crate::router::RouterHandle;
use crate::sync::{Clock, SystemClock};

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub recorder: Recorder,
    pub router: RouterHandle,
    pub started: Instant,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(serve_root))
        .route("/health", get(health))
        .route("/ws", get(protocol_ws))
        .route("/sessions/{target_id}", get(session_status))
        .with_state(state)
}

/// Serve root discovery endpoint
async fn serve_root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "tabreel",
        "version": env!("CARGO_PKG_VERSION"),
        "links": {
            "ws": "/ws",
            "sessions": "/sessions/{targetId}",
            "health": "/health",
        }
    }))
}

async fn health(State(state): State<WebState>) -> Json<serde_json::Value> {
    let registry = state.recorder.registry();
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.started.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": {
            "total": registry.list().len(),
            "active": registry.active_count(),
        }
    }))
}

async fn session_status(
    State(state): State<WebState>,
    Path(target_id): Path<String>,
) -> Json<StatusReport> {
    Json(state.recorder.status(&TargetId::from(target_id)).await)
}

async fn protocol_ws(State(state): State<WebState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one WebSocket connection.
///
/// A writer task owns the sink and merges broadcasts with replies; the
/// reader loop decodes frames and hands them to the router.
async fn handle_socket(socket: WebSocket, state: WebState) {
    let (mut sink, mut stream) = socket.split();
    let mut broadcasts = state.recorder.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Envelope<Outbound>>(64);

    info!("protocol client connected");

    let writer = tokio::spawn(async move {
        loop {
            let envelope = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(envelope) => envelope,
                    None => break,
                },
                received = broadcasts.recv() => match received {
                    Ok(envelope) => envelope,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "protocol client lagging, dropped broadcasts");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            let text = match envelope.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode outbound message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let envelope = match Envelope::<Inbound>::from_json(text.as_str()) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("rejecting frame: {}", e);
                let reply = Envelope::new(Outbound::Reply(Reply::error(e.to_string())), now_ms());
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
                continue;
            }
        };

        if envelope.message.expects_reply() {
            let pending = match state.router.submit(envelope.clone()).await {
                Ok(pending) => pending,
                Err(e) => {
                    warn!("failed to queue request: {:#}", e);
                    break;
                }
            };
            let reply_tx = reply_tx.clone();
            // Replies can wait on the store; keep reading meanwhile
            tokio::spawn(async move {
                let reply = pending
                    .await
                    .unwrap_or_else(|_| Reply::error("router dropped the request"));
                let _ = reply_tx
                    .send(Envelope::reply_to(&envelope, reply, now_ms()))
                    .await;
            });
        } else if let Err(e) = state.router.send(envelope).await {
            warn!("failed to queue message: {:#}", e);
            break;
        }
    }

    drop(reply_tx);
    let _ = writer.await;
    info!("protocol client disconnected");
}

fn now_ms() -> i64 {
    SystemClock.now_ms()
}
