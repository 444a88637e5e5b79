use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

use crate::annotate::serialize_feedback;
use crate::decision::DecisionController;
use crate::preferences::UserPreferences;
use crate::types::{Annotation, PlanReviewDecision};
use crate::update::UpdateInfo;

/// The review UI, embedded so the binary is self-contained.
const UI_DOCUMENT: &str = include_str!("../../ui/index.html");

// ===================================================================
// Shared state
// ===================================================================

/// Per-session state shared with the HTTP handlers. The plan itself is
/// immutable for the lifetime of the session; preferences and the update
/// check result may change while the server runs.
pub struct AppState {
    pub plan_content: String,
    pub plan_version: u32,
    pub plan_history: Vec<String>,
    pub preferences_path: PathBuf,
    pub preferences: Mutex<UserPreferences>,
    pub update_info: Mutex<Option<UpdateInfo>>,
    pub decision: DecisionController,
}

impl AppState {
    pub fn new(
        plan_content: String,
        plan_version: u32,
        plan_history: Vec<String>,
        preferences: UserPreferences,
        preferences_path: PathBuf,
        decision: DecisionController,
    ) -> Self {
        Self {
            plan_content,
            plan_version,
            plan_history,
            preferences_path,
            preferences: Mutex::new(preferences),
            update_info: Mutex::new(None),
            decision,
        }
    }

    /// Record a completed background update check for the UI to poll.
    pub async fn set_update_info(&self, info: UpdateInfo) {
        *self.update_info.lock().await = Some(info);
    }
}

// ===================================================================
// Routes
// ===================================================================

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/plan", get(get_plan).fallback(serve_ui))
        .route("/api/settings", post(update_settings).fallback(serve_ui))
        .route("/api/approve", post(approve).fallback(serve_ui))
        .route("/api/deny", post(deny).fallback(serve_ui))
        .route("/api/update-info", get(get_update_info).fallback(serve_ui))
        .fallback(serve_ui)
        .with_state(state)
}

async fn serve_ui() -> Html<&'static str> {
    Html(UI_DOCUMENT)
}

async fn get_plan(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let preferences = *state.preferences.lock().await;
    let update_info = state.update_info.lock().await.clone();
    Json(json!({
        "plan": state.plan_content,
        "version": state.plan_version,
        "history": state.plan_history,
        "preferences": preferences,
        "updateInfo": update_info,
    }))
}

async fn get_update_info(State(state): State<Arc<AppState>>) -> Json<Option<UpdateInfo>> {
    Json(state.update_info.lock().await.clone())
}

async fn update_settings(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return bad_request("Invalid JSON body");
    };
    let Some(auto_close) = value.get("autoCloseOnSubmit").and_then(|v| v.as_bool()) else {
        return bad_request("autoCloseOnSubmit must be a boolean");
    };

    let updated = UserPreferences {
        auto_close_on_submit: auto_close,
    };
    if let Err(err) = updated.persist(&state.preferences_path) {
        warn!("failed to persist preferences: {err:#}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to persist settings" })),
        )
            .into_response();
    }
    *state.preferences.lock().await = updated;

    Json(json!({ "ok": true, "preferences": updated })).into_response()
}

async fn approve(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state
        .decision
        .resolve(PlanReviewDecision {
            approved: true,
            feedback: None,
            annotations: None,
        })
        .await;
    Json(json!({ "ok": true }))
}

#[derive(Deserialize)]
struct DenyBody {
    annotations: Vec<Annotation>,
}

async fn deny(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Ok(deny_body) = serde_json::from_slice::<DenyBody>(&body) else {
        return bad_request("Invalid JSON body");
    };

    let feedback = serialize_feedback(&deny_body.annotations);
    state
        .decision
        .resolve(PlanReviewDecision {
            approved: false,
            feedback: Some(feedback),
            annotations: Some(deny_body.annotations),
        })
        .await;
    Json(json!({ "ok": true })).into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

// ===================================================================
// Lifecycle
// ===================================================================

/// A started HTTP listener with its bound port and a single-use stop handle.
pub struct ServerHandle {
    pub port: u16,
    shutdown_tx: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for the serve task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

/// Bind the loopback listener and serve the router in a background task.
/// Port 0 asks the OS for an ephemeral port; the bound one is returned.
pub async fn start(state: Arc<AppState>, port: u16) -> Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("binding 127.0.0.1:{port}"))?;
    let port = listener
        .local_addr()
        .context("reading bound address")?
        .port();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let router = build_router(state);
    let task = tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(err) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!("http server error: {err}");
        }
    });

    Ok(ServerHandle {
        port,
        shutdown_tx,
        task,
    })
}
