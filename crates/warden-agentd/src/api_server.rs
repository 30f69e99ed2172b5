//! HTTP surface for prompt submission and session introspection.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;

use warden_core::current_unix_timestamp_ms;
use warden_queue::PromptQueue;
use warden_session::SessionStateStore;

pub(crate) struct ApiState {
    pub(crate) session_id: String,
    pub(crate) started_at_unix_ms: u64,
    pub(crate) queue: PromptQueue,
    pub(crate) store: Arc<Mutex<SessionStateStore>>,
}

fn lock_store(store: &Mutex<SessionStateStore>) -> std::sync::MutexGuard<'_, SessionStateStore> {
    store
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn uptime_seconds(started_at_unix_ms: u64) -> u64 {
    current_unix_timestamp_ms()
        .saturating_sub(started_at_unix_ms)
        / 1_000
}

pub(crate) fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/prompt", post(handle_submit_prompt))
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .with_state(state)
}

pub(crate) async fn serve(
    listener: TcpListener,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("api server exited unexpectedly")
}

#[derive(Debug, Deserialize)]
struct PromptRequest {
    prompt: String,
    #[serde(default)]
    author: Option<String>,
}

async fn handle_submit_prompt(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<PromptRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    if request.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "prompt must not be empty" })),
        );
    }
    let author = request
        .author
        .filter(|author| !author.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    {
        let mut store = lock_store(&state.store);
        store.touch_activity();
        if let Err(error) = store.save() {
            tracing::warn!(%error, "failed to persist session activity");
        }
    }

    match state.queue.submit(request.prompt, author) {
        Ok(queue_position) => (
            StatusCode::OK,
            Json(json!({
                "message": "prompt queued for processing",
                "queue_position": queue_position,
            })),
        ),
        Err(error) => {
            tracing::warn!(%error, "prompt submission rejected");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "prompt queue is shut down" })),
            )
        }
    }
}

async fn handle_health(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "session_id": state.session_id,
        "uptime_seconds": uptime_seconds(state.started_at_unix_ms),
    }))
}

async fn handle_status(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let snapshot = state.queue.snapshot();
    let (status, resumption_token, runs_completed, runs_failed) = {
        let store = lock_store(&state.store);
        let record = store.record();
        (
            record.status.as_str(),
            record.resumption_token.clone(),
            record.total_runs_completed,
            record.total_runs_failed,
        )
    };
    Json(json!({
        "session_id": state.session_id,
        "status": status,
        "uptime_seconds": uptime_seconds(state.started_at_unix_ms),
        "queue_length": snapshot.queue_length,
        "is_processing": snapshot.is_processing,
        "resumption_token": resumption_token,
        "total_runs_completed": runs_completed,
        "total_runs_failed": runs_failed,
    }))
}
