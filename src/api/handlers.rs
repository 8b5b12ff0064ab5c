//! REST handlers mirroring the realtime operations.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::session::Session;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct SendPromptRequest {
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.work_dir.is_empty() {
        return Err(ApiError::BadRequest("workDir is required".to_string()));
    }

    let session = state.manager.create(&req.work_dir, &req.label).await?;
    state.announce_session(&session).await;

    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    Json(state.manager.list().await)
}

/// GET /api/sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.manager.get(&id).await?))
}

/// POST /api/sessions/{id}/prompt
pub async fn send_prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendPromptRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.prompt.is_empty() {
        return Err(ApiError::BadRequest("prompt is required".to_string()));
    }

    state.manager.send_prompt(&id, &req.prompt).await?;
    Ok(Json(json!({"status": "sent"})))
}

/// DELETE /api/sessions/{id}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.manager.kill(&id).await?;
    state.watcher.unwatch(&id);
    Ok(Json(json!({"status": "terminated"})))
}
