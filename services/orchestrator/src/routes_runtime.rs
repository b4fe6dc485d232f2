use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use std::sync::Arc;

use crate::backend::ExecutionBackend;
use crate::state::SharedState;

pub async fn get_health(State(state): State<SharedState>) -> (StatusCode, Json<serde_json::Value>) {
    let backend = state.orchestrator.get_server_status().await.backend;
    let supervisor = match &state.supervisor {
        Some(s) => Some(s.health().await),
        None => None,
    };

    let code = if backend.healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        code,
        Json(serde_json::json!({
            "status": if backend.healthy { "ok" } else { "degraded" },
            "backend": backend,
            "supervisor": supervisor,
        })),
    )
}

pub async fn get_status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let status = state.orchestrator.get_server_status().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds();
    Json(serde_json::json!({
        "server": status,
        "started_at": state.started_at,
        "uptime_secs": uptime_secs,
    }))
}

pub async fn executor_health(State(backend): State<Arc<dyn ExecutionBackend>>) -> (StatusCode, Json<serde_json::Value>) {
    let status = backend.describe().await;
    let code = if status.healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(serde_json::json!({ "status": if status.healthy { "ok" } else { "degraded" }, "backend": status })))
}
