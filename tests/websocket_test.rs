//! WebSocket integration: session lifecycle, keepalive, notifications.

mod common;

use common::{plant_state, spawn_server};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

async fn next_json(
    socket: &mut (impl futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
          + Unpin),
) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(5), socket.next())
            .await
            .expect("websocket message within timeout")
            .expect("socket open")
            .expect("socket ok");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_assigns_a_session_and_answers_ping() {
    let (state, _id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state.clone()).await;

    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    let hello = next_json(&mut socket).await;
    assert_eq!(hello["type"], "session");
    let session_id = hello["session"].as_str().unwrap().to_string();
    assert!(!session_id.is_empty());
    assert_eq!(state.sessions.lock().await.len(), 1);

    socket
        .send(Message::Text(r#"{"type":"ping"}"#.to_string().into()))
        .await
        .unwrap();
    let pong = next_json(&mut socket).await;
    assert_eq!(pong["type"], "pong");

    // Disconnect destroys the session
    socket.close(None).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(state.sessions.lock().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn position_updates_stay_in_their_session() {
    let (state, _id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state.clone()).await;

    let (mut alpha, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let (mut beta, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let alpha_id = next_json(&mut alpha).await["session"].as_str().unwrap().to_string();
    let beta_id = next_json(&mut beta).await["session"].as_str().unwrap().to_string();
    assert_ne!(alpha_id, beta_id);

    alpha
        .send(Message::Text(
            r#"{"type":"update_positions","positions":{"H01":{"x":9.0,"y":8.0}}}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let ack = next_json(&mut alpha).await;
    assert_eq!(ack["type"], "positions_applied");
    assert_eq!(ack["count"], 1);

    let sessions = state.sessions.lock().await;
    assert_eq!(sessions.get(&alpha_id).unwrap().positions.len(), 1);
    assert!(sessions.get(&beta_id).unwrap().positions.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_message_gets_error_reply_and_connection_stays_open() {
    let (state, _id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;

    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let _hello = next_json(&mut socket).await;

    socket
        .send(Message::Text(r#"{"type":"dance"}"#.to_string().into()))
        .await
        .unwrap();
    let reply = next_json(&mut socket).await;
    assert_eq!(reply["type"], "error");

    // Still usable afterwards
    socket
        .send(Message::Text(r#"{"type":"ping"}"#.to_string().into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "pong");
}

#[tokio::test(flavor = "multi_thread")]
async fn layout_save_notifies_connected_clients() {
    let (state, id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state.clone()).await;

    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let _hello = next_json(&mut socket).await;

    let doc = state.update_flowsheet(&id).await.unwrap();
    let version = state.save_flowsheet(&id, doc).await.unwrap();

    let msg = next_json(&mut socket).await;
    assert_eq!(msg["type"], "graph_changed");
    assert_eq!(msg["flowsheet"], id);
    assert_eq!(msg["version"], version);
}
