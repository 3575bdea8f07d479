//! WebSocket handler for live updates and per-session view-state edits.
//!
//! Each connection creates a [`ClientSession`](super::session::ClientSession)
//! on upgrade and destroys it on disconnect. Outbound traffic merges the
//! server-wide broadcast (graph-changed / reload notifications) with
//! per-connection replies; inbound messages are handled sequentially on the
//! receive loop, which is what guarantees a single session's position
//! updates apply in receipt order.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::{broadcast, mpsc};

use super::AppState;
use super::protocol::{ClientMessage, ServerMessage};

/// WebSocket upgrade handler for `GET /ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = state.sessions.lock().await.create();
    tracing::debug!(session = %session_id, "websocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Replies to this connection only; merged with the broadcast below
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(32);

    reply_tx
        .send(
            ServerMessage::Session {
                session: session_id.clone(),
            }
            .to_json(),
        )
        .await
        .ok();

    let mut update_rx = state.update_tx.subscribe();
    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                broadcasted = update_rx.recv() => match broadcasted {
                    Ok(text) => text,
                    // Skipped notifications are fine: the client re-fetches
                    // the full document on the next one
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(text) => text,
                    None => break,
                },
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_session = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let reply = handle_client_message(&recv_state, &recv_session, text.as_str()).await;
                    if reply_tx.send(reply.to_json()).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                // Axum answers pings at the protocol level
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.sessions.lock().await.remove(&session_id);
    tracing::debug!(session = %session_id, "websocket disconnected");
}

/// Handle one inbound client message, producing the reply to send back.
///
/// Malformed messages produce an `error` reply; the connection stays open.
async fn handle_client_message(state: &AppState, session_id: &str, text: &str) -> ServerMessage {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(ClientMessage::Ping) => ServerMessage::Pong,
        Ok(ClientMessage::UpdatePositions { positions }) => {
            let mut sessions = state.sessions.lock().await;
            match sessions.update_positions(session_id, positions) {
                Ok(count) => ServerMessage::PositionsApplied { count },
                Err(e) => ServerMessage::Error {
                    message: e.to_string(),
                },
            }
        }
        Err(e) => ServerMessage::Error {
            message: format!("unrecognized message: {}", e),
        },
    }
}
