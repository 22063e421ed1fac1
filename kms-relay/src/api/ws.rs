//! WebSocket endpoint for performance members
//!
//! One socket per device. The first frame must be `join_performance`; the
//! relay answers every join with a full snapshot. After that the socket
//! carries control intents up and the other members' broadcasts down.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use kms_common::protocol::{ClientMessage, ServerMessage};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::{Broadcast, ConnectionId};
use crate::AppState;

type SocketSink = SplitSink<WebSocket, Message>;

/// GET /performances/:session_id/ws
pub async fn performance_socket(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

/// Drive one member connection until either side closes
async fn handle_socket(socket: WebSocket, session_id: String, state: AppState) {
    let conn: ConnectionId = Uuid::new_v4();
    info!("Connection {} opened for performance {}", conn, session_id);

    let (mut sink, mut stream) = socket.split();
    let mut subscription: Option<broadcast::Receiver<Broadcast>> = None;

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let keep_open = handle_frame(
                            &text, &session_id, conn, &state, &mut sink, &mut subscription,
                        ).await;
                        if !keep_open {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("Connection {} socket error: {}", conn, e);
                        break;
                    }
                    _ => {} // Ping/pong handled by axum, binary ignored
                }
            }
            broadcast = next_broadcast(&mut subscription) => {
                match broadcast {
                    Ok(b) if b.origin == conn => {}
                    Ok(b) => {
                        if send(&mut sink, &b.message).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Missed fan-out; a fresh snapshot restores convergence
                        warn!("Connection {} lagged by {} messages, resending snapshot", conn, skipped);
                        if let Some(snapshot) = state.registry.snapshot(&session_id).await {
                            if send(&mut sink, &ServerMessage::PerformanceState(snapshot)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    state.registry.leave(&session_id, conn).await;
    info!("Connection {} closed", conn);
}

/// Handle one text frame; returns false when the socket should close
async fn handle_frame(
    text: &str,
    session_id: &str,
    conn: ConnectionId,
    state: &AppState,
    sink: &mut SocketSink,
    subscription: &mut Option<broadcast::Receiver<Broadcast>>,
) -> bool {
    let message = match ClientMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Connection {} sent malformed frame: {}", conn, e);
            return send_error(sink, e.to_string()).await;
        }
    };

    match message {
        ClientMessage::JoinPerformance => {
            let (snapshot, rx) = state.registry.join(session_id, conn).await;
            // Re-join replaces the subscription so nothing is delivered twice
            *subscription = Some(rx);
            send(sink, &ServerMessage::PerformanceState(snapshot)).await.is_ok()
        }
        other => {
            debug!("Connection {} -> {:?}", conn, other);
            match state.registry.apply(session_id, conn, other).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Connection {} intent rejected: {}", conn, e);
                    send_error(sink, e.to_string()).await
                }
            }
        }
    }
}

async fn next_broadcast(
    subscription: &mut Option<broadcast::Receiver<Broadcast>>,
) -> Result<Broadcast, RecvError> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send(sink: &mut SocketSink, message: &ServerMessage) -> Result<(), ()> {
    let text = match message.to_json() {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize {}: {}", message.kind(), e);
            return Ok(());
        }
    };
    sink.send(Message::Text(text)).await.map_err(|e| {
        debug!("Socket send failed: {}", e);
    })
}

async fn send_error(sink: &mut SocketSink, message: String) -> bool {
    send(sink, &ServerMessage::Error { message }).await.is_ok()
}
