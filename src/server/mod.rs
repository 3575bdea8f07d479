//! Web server exposing flowsheet snapshots to browser clients.
//!
//! One server process serves every flowsheet registered in it, so requests
//! carry the flowsheet id as a query parameter. The HTTP surface:
//!
//! - `GET /app?id=` - the diagram page for one flowsheet
//! - `GET /fs?id=` - latest merged graph document (JSON)
//! - `PUT /fs?id=` - store a layout save from the client
//! - `GET /setting?key=` - server settings block value
//! - `POST /api/refresh?id=` - force re-extraction and notify clients
//! - `GET /api/flowsheets` - registered flowsheet ids and versions
//! - `POST|GET|PUT|DELETE /api/session...` - per-session view state
//! - `GET /ws` - WebSocket notifications (see [`protocol`])
//!
//! Retrieval always reconciles the saved document with a fresh extraction
//! of the live model ([`snapshot::diff`](crate::snapshot::diff)), so a
//! returned graph is internally consistent and carries the user's layout.
//! Layout saves never mutate the model - presentation state only.

pub mod protocol;
pub mod session;
pub mod watcher;
mod websocket;

use axum::{
    Json, Router,
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::{Mutex, broadcast};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::Settings;
use crate::model::Flowsheet;
use crate::snapshot::diff::GraphDiff;
use crate::snapshot::{FlowsheetGraph, Position, extract};
use crate::store::{DataStore, DataStoreManager};
use crate::{Error, Result};

use protocol::ServerMessage;
use session::SessionRegistry;

/// One registered flowsheet: the live model plus the served version counter.
struct FlowsheetSlot {
    model: Flowsheet,
    /// Bumped whenever the served document changes (merge or layout save)
    version: u64,
}

/// Shared application state.
///
/// The model registry sits behind an async mutex: extraction walks the live
/// model, and the model is not safe for concurrent mutation, so every
/// reader/writer serializes here.
#[derive(Clone)]
pub struct AppState {
    flowsheets: Arc<Mutex<HashMap<String, FlowsheetSlot>>>,
    pub sessions: Arc<Mutex<SessionRegistry>>,
    pub stores: Arc<DataStoreManager>,
    /// Broadcast channel fanning notifications out to WebSocket clients
    pub update_tx: broadcast::Sender<String>,
    pub settings: Arc<Settings>,
    settings_block: Arc<StdMutex<HashMap<String, serde_json::Value>>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let (update_tx, _) = broadcast::channel(100);
        let settings_block = settings.settings_block();
        Self {
            flowsheets: Arc::new(Mutex::new(HashMap::new())),
            sessions: Arc::new(Mutex::new(SessionRegistry::new())),
            stores: Arc::new(DataStoreManager::new()),
            update_tx,
            settings: Arc::new(settings),
            settings_block: Arc::new(StdMutex::new(settings_block)),
        }
    }

    /// Register a flowsheet and its datastore under a canonical id.
    ///
    /// The saved document is reconciled immediately: an existing save keeps
    /// its layout, a missing one is created from a fresh extraction. Returns
    /// the canonical id (which may differ from `name`).
    pub async fn add_flowsheet(
        &self,
        name: &str,
        model: Flowsheet,
        store: Box<dyn DataStore>,
    ) -> Result<String> {
        let id = canonical_name(name);
        if id.is_empty() {
            return Err(Error::InvalidInput(format!(
                "flowsheet name '{}' has no usable characters",
                name
            )));
        }
        self.stores.add(id.clone(), store);
        {
            let mut flowsheets = self.flowsheets.lock().await;
            flowsheets.insert(id.clone(), FlowsheetSlot { model, version: 0 });
        }
        self.update_flowsheet(&id).await?;
        tracing::info!(flowsheet = %id, "registered flowsheet");
        Ok(id)
    }

    /// Ids of all registered flowsheets with their served versions.
    pub async fn flowsheet_versions(&self) -> Vec<(String, u64)> {
        let flowsheets = self.flowsheets.lock().await;
        let mut out: Vec<(String, u64)> = flowsheets
            .iter()
            .map(|(id, slot)| (id.clone(), slot.version))
            .collect();
        out.sort();
        out
    }

    /// Retrieve the up-to-date document for `id`, re-saving it if the model
    /// drifted from the stored copy.
    pub async fn update_flowsheet(&self, id: &str) -> Result<FlowsheetGraph> {
        let mut flowsheets = self.flowsheets.lock().await;
        if flowsheets.is_empty() {
            return Err(Error::NoModelLoaded);
        }
        let slot = flowsheets
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("flowsheet '{}'", id)))?;

        let fresh = extract(&slot.model)?;
        let saved = match self.stores.load(id) {
            Ok(doc) => doc,
            Err(Error::NotFound(_)) => {
                // First save for this flowsheet
                let mut doc = fresh;
                slot.version += 1;
                doc.version = slot.version;
                self.stores.save(id, &doc)?;
                return Ok(doc);
            }
            Err(e) => return Err(e),
        };

        let diff = GraphDiff::new(&saved, &fresh);
        if diff.is_empty() {
            tracing::debug!(flowsheet = %id, "stored document matches the model");
            return Ok(saved);
        }

        tracing::debug!(flowsheet = %id, changes = diff.len(), "model drifted from stored document");
        slot.version = slot.version.max(saved.version) + 1;
        let mut merged = diff.into_merged();
        merged.version = slot.version;
        self.stores.save(id, &merged)?;
        self.broadcast(&ServerMessage::GraphChanged {
            flowsheet: id.to_string(),
            version: merged.version,
            timestamp: chrono::Utc::now(),
        });
        Ok(merged)
    }

    /// Store a full graph document sent by a client (layout save).
    ///
    /// Presentation state only - the live model is never touched. Returns
    /// the new served version.
    pub async fn save_flowsheet(&self, id: &str, mut doc: FlowsheetGraph) -> Result<u64> {
        doc.validate()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;

        let mut flowsheets = self.flowsheets.lock().await;
        if flowsheets.is_empty() {
            return Err(Error::NoModelLoaded);
        }
        let slot = flowsheets
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("flowsheet '{}'", id)))?;

        slot.version += 1;
        doc.version = slot.version;
        self.stores.save(id, &doc)?;
        self.broadcast(&ServerMessage::GraphChanged {
            flowsheet: id.to_string(),
            version: doc.version,
            timestamp: chrono::Utc::now(),
        });
        Ok(doc.version)
    }

    /// Re-extract and notify clients even when nothing changed.
    pub async fn refresh_flowsheet(&self, id: &str) -> Result<FlowsheetGraph> {
        let doc = self.update_flowsheet(id).await?;
        // update_flowsheet only notifies on drift; a refresh always does,
        // so clients resync after model-side mutations of equal value
        self.broadcast(&ServerMessage::GraphChanged {
            flowsheet: id.to_string(),
            version: doc.version,
            timestamp: chrono::Utc::now(),
        });
        Ok(doc)
    }

    /// Replace the live model behind an id, e.g. after a solver pass.
    pub async fn replace_model(&self, id: &str, model: Flowsheet) -> Result<()> {
        {
            let mut flowsheets = self.flowsheets.lock().await;
            let slot = flowsheets
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("flowsheet '{}'", id)))?;
            slot.model = model;
        }
        self.refresh_flowsheet(id).await?;
        Ok(())
    }

    /// Add a value to the settings block served by `GET /setting`.
    pub fn add_setting(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut block = self.settings_block.lock().expect("settings lock poisoned");
        block.insert(key.into(), value);
    }

    /// Read a settings block value. `None` when the key is not set.
    pub fn get_setting(&self, key: &str) -> Option<serde_json::Value> {
        let block = self.settings_block.lock().expect("settings lock poisoned");
        let value = block.get(key).cloned();
        if value.is_none() {
            tracing::warn!(key, "setting not present in the settings block");
        }
        value
    }

    /// Watch a save file, broadcasting reload notifications on change.
    ///
    /// Must run on the server runtime.
    pub fn spawn_save_watcher(&self, path: PathBuf) {
        let update_tx = self.update_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher::watch_save_file(path, update_tx).await {
                tracing::warn!(error = %e, "save file watcher stopped");
            }
        });
    }

    fn broadcast(&self, msg: &ServerMessage) {
        // Send errors just mean no client is connected
        let _ = self.update_tx.send(msg.to_json());
    }
}

/// Canonical flowsheet id from a user-provided name.
///
/// All but unreserved URL characters become dashes; dash runs collapse.
pub fn canonical_name(name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    static DASHES: OnceLock<Regex> = OnceLock::new();
    let invalid = INVALID.get_or_init(|| Regex::new(r"[^a-zA-Z0-9\-._~]").expect("static regex"));
    let dashes = DASHES.get_or_init(|| Regex::new(r"-+").expect("static regex"));
    let replaced = invalid.replace_all(name, "-");
    dashes.replace_all(&replaced, "-").into_owned()
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(serve_root))
        .route("/app", get(serve_app))
        .route("/fs", get(get_fs).put(put_fs))
        .route("/setting", get(get_setting))
        .route("/api/flowsheets", get(list_flowsheets))
        .route("/api/refresh", post(post_refresh))
        .route("/api/session", post(create_session))
        .route(
            "/api/session/{sid}",
            get(get_session).delete(delete_session),
        )
        .route("/api/session/{sid}/positions", axum::routing::put(put_session_positions))
        .route("/ws", get(websocket::ws_handler));

    if let Some(static_dir) = &state.settings.static_dir {
        router = router.nest_service("/static", ServeDir::new(static_dir));
    }

    router.layer(CorsLayer::permissive()).with_state(state)
}

/// Start serving on an already-bound listener until `shutdown` resolves.
///
/// Binding happens in [`lifecycle::bind_listener`](crate::lifecycle::bind_listener)
/// so port-in-use surfaces before any pid file is written.
pub async fn start_server(
    state: AppState,
    listener: std::net::TcpListener,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;
    let app = create_router(state);
    tracing::info!(%addr, "flowsheet visualization server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!(%addr, "server stopped");
    Ok(())
}

// === Handlers ===

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(err: Error) -> ApiError {
    let status = match &err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::NoModelLoaded => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

#[derive(Deserialize)]
struct IdQuery {
    id: Option<String>,
}

fn require_id(q: IdQuery) -> std::result::Result<String, ApiError> {
    q.id.ok_or_else(|| {
        error_response(Error::InvalidInput(
            "query parameter 'id' is required".into(),
        ))
    })
}

/// Landing page: links to each registered flowsheet's diagram.
async fn serve_root(State(state): State<AppState>) -> Html<String> {
    let flowsheets = state.flowsheet_versions().await;
    let items: String = flowsheets
        .iter()
        .map(|(id, _)| format!("<li><a href=\"/app?id={id}\">{id}</a></li>"))
        .collect();
    Html(format!(
        "<!doctype html><title>flowvis</title><h1>Flowsheets</h1><ul>{}</ul>",
        items
    ))
}

/// The diagram page, with the flowsheet id baked in.
async fn serve_app(Query(q): Query<IdQuery>) -> std::result::Result<Html<String>, ApiError> {
    let id = require_id(q)?;
    let page = include_str!("../../assets/index.html").replace("__FLOWSHEET_ID__", &id);
    Ok(Html(page))
}

/// Latest merged graph document.
async fn get_fs(
    State(state): State<AppState>,
    Query(q): Query<IdQuery>,
) -> std::result::Result<Json<FlowsheetGraph>, ApiError> {
    let id = require_id(q)?;
    let doc = state.update_flowsheet(&id).await.map_err(error_response)?;
    Ok(Json(doc))
}

/// Layout save from the client.
async fn put_fs(
    State(state): State<AppState>,
    Query(q): Query<IdQuery>,
    body: String,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let id = require_id(q)?;
    let doc: FlowsheetGraph = serde_json::from_str(&body).map_err(|e| {
        error_response(Error::InvalidInput(format!("request body: {}", e)))
    })?;
    let version = state
        .save_flowsheet(&id, doc)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({ "saved": true, "version": version })))
}

#[derive(Deserialize)]
struct SettingQuery {
    key: Option<String>,
}

async fn get_setting(
    State(state): State<AppState>,
    Query(q): Query<SettingQuery>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let key = q.key.ok_or_else(|| {
        error_response(Error::InvalidInput(
            "query parameter 'key' is required".into(),
        ))
    })?;
    let value = state.get_setting(&key).unwrap_or(serde_json::Value::Null);
    Ok(Json(serde_json::json!({ "setting_value": value })))
}

async fn list_flowsheets(State(state): State<AppState>) -> Json<serde_json::Value> {
    let flowsheets: Vec<serde_json::Value> = state
        .flowsheet_versions()
        .await
        .into_iter()
        .map(|(id, version)| serde_json::json!({ "id": id, "version": version }))
        .collect();
    Json(serde_json::json!({ "flowsheets": flowsheets }))
}

async fn post_refresh(
    State(state): State<AppState>,
    Query(q): Query<IdQuery>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let id = require_id(q)?;
    let doc = state.refresh_flowsheet(&id).await.map_err(error_response)?;
    Ok(Json(serde_json::json!({ "refreshed": true, "version": doc.version })))
}

async fn create_session(State(state): State<AppState>) -> Json<serde_json::Value> {
    let id = state.sessions.lock().await.create();
    Json(serde_json::json!({ "session": id }))
}

async fn get_session(
    State(state): State<AppState>,
    AxumPath(sid): AxumPath<String>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let sessions = state.sessions.lock().await;
    let session = sessions
        .get(&sid)
        .ok_or_else(|| error_response(Error::NotFound(format!("session '{}'", sid))))?;
    Ok(Json(serde_json::to_value(session).expect("session serializes")))
}

async fn put_session_positions(
    State(state): State<AppState>,
    AxumPath(sid): AxumPath<String>,
    body: String,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let positions: HashMap<String, Position> = serde_json::from_str(&body).map_err(|e| {
        error_response(Error::InvalidInput(format!("request body: {}", e)))
    })?;
    let applied = state
        .sessions
        .lock()
        .await
        .update_positions(&sid, positions)
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({ "applied": applied })))
}

async fn delete_session(
    State(state): State<AppState>,
    AxumPath(sid): AxumPath<String>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let removed = state.sessions.lock().await.remove(&sid);
    if !removed {
        return Err(error_response(Error::NotFound(format!(
            "session '{}'",
            sid
        ))));
    }
    Ok(Json(serde_json::json!({ "removed": true })))
}
