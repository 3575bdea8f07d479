//! Integration tests for the HTTP API against a live server.

mod common;

use common::{plant_state, spawn_server};
use flowvis::snapshot::FlowsheetGraph;

#[tokio::test(flavor = "multi_thread")]
async fn get_fs_returns_consistent_graph() {
    let (state, id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;

    let url = format!("http://{}/fs?id={}", addr, id);
    let resp = reqwest::get(&url).await.expect("server reachable");
    assert!(resp.status().is_success());

    let graph: FlowsheetGraph = resp.json().await.unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);
    let ids = graph.node_ids();
    for edge in &graph.edges {
        assert!(ids.contains(edge.source.as_str()));
        assert!(ids.contains(edge.target.as_str()));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn fs_routes_require_id_parameter() {
    let (state, _id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;

    for path in ["/fs", "/app"] {
        let resp = reqwest::get(format!("http://{}{}", addr, path)).await.unwrap();
        assert_eq!(resp.status(), 400, "{} without id", path);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_flowsheet_is_404() {
    let (state, _id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;

    let resp = reqwest::get(format!("http://{}/fs?id=unknown", addr)).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("unknown"));
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_server_is_503() {
    let state = flowvis::server::AppState::new(flowvis::config::Settings::default());
    let (addr, _shutdown) = spawn_server(state).await;

    let resp = reqwest::get(format!("http://{}/fs?id=anything", addr)).await.unwrap();
    assert_eq!(resp.status(), 503);
}

#[tokio::test(flavor = "multi_thread")]
async fn layout_save_round_trips_through_the_api() {
    let (state, id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;
    let client = reqwest::Client::new();

    let base = format!("http://{}/fs?id={}", addr, id);
    let mut graph: FlowsheetGraph = client.get(&base).send().await.unwrap().json().await.unwrap();
    for node in &mut graph.nodes {
        node.position = Some(flowvis::snapshot::Position { x: 33.0, y: 44.0 });
    }

    let resp = client.put(&base).json(&graph).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["saved"], true);

    let back: FlowsheetGraph = client.get(&base).send().await.unwrap().json().await.unwrap();
    assert!(back.nodes.iter().all(|n| {
        n.position == Some(flowvis::snapshot::Position { x: 33.0, y: 44.0 })
    }));
    assert_eq!(back.version, body["version"].as_u64().unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_layout_save_is_400_and_connection_survives() {
    let (state, id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;
    let client = reqwest::Client::new();

    let base = format!("http://{}/fs?id={}", addr, id);
    let resp = client.put(&base).body("{definitely not json").send().await.unwrap();
    assert_eq!(resp.status(), 400);

    // Same client keeps working afterwards
    let resp = client.get(&base).send().await.unwrap();
    assert!(resp.status().is_success());
}

#[tokio::test(flavor = "multi_thread")]
async fn setting_endpoint_serves_the_block() {
    let (state, _id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;

    let resp = reqwest::get(format!("http://{}/setting?key=save_time_interval", addr))
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["setting_value"], 5000);

    let resp = reqwest::get(format!("http://{}/setting?key=nope", addr)).await.unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["setting_value"].is_null());

    let resp = reqwest::get(format!("http://{}/setting", addr)).await.unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test(flavor = "multi_thread")]
async fn app_page_carries_the_flowsheet_id() {
    let (state, id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;

    let resp = reqwest::get(format!("http://{}/app?id={}", addr, id)).await.unwrap();
    assert!(resp.status().is_success());
    let page = resp.text().await.unwrap();
    assert!(page.contains(&format!("\"{}\"", id)));
    assert!(!page.contains("__FLOWSHEET_ID__"));
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_bumps_nothing_but_notifies() {
    let (state, id) = plant_state().await;
    let mut rx = state.update_tx.subscribe();
    let (addr, _shutdown) = spawn_server(state).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/api/refresh?id={}", addr, id))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let notification = rx.recv().await.unwrap();
    let msg: serde_json::Value = serde_json::from_str(&notification).unwrap();
    assert_eq!(msg["type"], "graph_changed");
}

#[tokio::test(flavor = "multi_thread")]
async fn flowsheet_listing_names_registered_models() {
    let (state, id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;

    let resp = reqwest::get(format!("http://{}/api/flowsheets", addr)).await.unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    let list = body["flowsheets"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], id);
}
