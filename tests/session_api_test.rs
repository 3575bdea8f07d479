//! REST session routes: lifecycle and cross-session isolation.

mod common;

use common::{plant_state, spawn_server};

#[tokio::test(flavor = "multi_thread")]
async fn session_updates_are_isolated_over_the_api() {
    let (state, _id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}/api/session", addr);

    let alpha: serde_json::Value = client
        .post(&base)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let beta: serde_json::Value = client
        .post(&base)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let alpha = alpha["session"].as_str().unwrap();
    let beta = beta["session"].as_str().unwrap();

    let resp = client
        .put(format!("{}/{}/positions", base, alpha))
        .body(r#"{"H01": {"x": 1.0, "y": 2.0}, "F01": {"x": 3.0, "y": 4.0}}"#)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["applied"], 2);

    let alpha_state: serde_json::Value = client
        .get(format!("{}/{}", base, alpha))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alpha_state["positions"]["H01"]["x"], 1.0);

    let beta_state: serde_json::Value = client
        .get(format!("{}/{}", base, beta))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        beta_state["positions"],
        serde_json::json!({}),
        "session B must never see session A's updates"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_session_is_404_and_bad_body_is_400() {
    let (state, _id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}/api/session", addr);

    let resp = client
        .put(format!("{}/not-a-session/positions", base))
        .body(r#"{"H01": {"x": 1.0, "y": 2.0}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let created: serde_json::Value = client
        .post(&base)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sid = created["session"].as_str().unwrap();
    let resp = client
        .put(format!("{}/{}/positions", base, sid))
        .body("positions go here")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test(flavor = "multi_thread")]
async fn deleted_session_is_gone() {
    let (state, _id) = plant_state().await;
    let (addr, _shutdown) = spawn_server(state).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}/api/session", addr);

    let created: serde_json::Value = client
        .post(&base)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sid = created["session"].as_str().unwrap();

    let resp = client.delete(format!("{}/{}", base, sid)).send().await.unwrap();
    assert!(resp.status().is_success());
    let resp = client.get(format!("{}/{}", base, sid)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let resp = client.delete(format!("{}/{}", base, sid)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}
