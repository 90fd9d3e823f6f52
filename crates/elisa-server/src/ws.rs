//! Live event channel: one WebSocket per session at `/ws/session/:id`.
//!
//! On open the server greets with `session_started`, then forwards every
//! bus event as one JSON document per frame. The event receiver is taken
//! by the first connection; reconnection is the client's responsibility
//! and missed events are not replayed.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};

use crate::AppState;

pub async fn handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

async fn handle_socket(socket: WebSocket, session_id: String, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let Some(session) = state.store.get(&session_id) else {
        let frame = serde_json::json!({
            "type": "error",
            "message": format!("unknown session {}", session_id),
            "recoverable": false,
        });
        let _ = sink.send(Message::Text(frame.to_string())).await;
        return;
    };

    let greeting = serde_json::json!({
        "type": "session_started",
        "session_id": session.id,
    });
    if sink.send(Message::Text(greeting.to_string())).await.is_err() {
        return;
    }

    let Some(mut events) = session.take_events() else {
        let frame = serde_json::json!({
            "type": "error",
            "message": "session already has a subscriber",
            "recoverable": false,
        });
        let _ = sink.send(Message::Text(frame.to_string())).await;
        return;
    };

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let frame = match serde_json::to_string(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "unserializable event dropped");
                        continue;
                    }
                };
                if sink.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {} // inbound frames are not part of the protocol
                }
            }
        }
    }

    tracing::debug!(session_id = %session.id, "event channel closed");
}
