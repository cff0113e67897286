//! Watcher CRUD endpoints.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::error;

use super::{ApiError, ApiResult, AppState};
use crate::db::watchers::{self, Watcher};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/watchers", get(list_watchers).post(create_watcher))
        .route(
            "/api/watchers/:id",
            axum::routing::delete(delete_watcher),
        )
        .route("/api/watchers/:id/toggle", post(toggle_watcher))
}

async fn list_watchers(State(state): State<AppState>) -> ApiResult<Json<Vec<Watcher>>> {
    Ok(Json(watchers::list(&state.db).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateWatcherRequest {
    pub path: String,
    pub target_language: Option<String>,
    pub llm_provider: Option<String>,
}

async fn create_watcher(
    State(state): State<AppState>,
    Json(request): Json<CreateWatcherRequest>,
) -> ApiResult<Json<Watcher>> {
    if !PathBuf::from(&request.path).is_dir() {
        return Err(ApiError::NotFound("Directory not found".to_string()));
    }
    if watchers::exists_for_path(&state.db, &request.path).await? {
        return Err(ApiError::BadRequest(
            "Directory is already being watched".to_string(),
        ));
    }

    let settings = state.settings.snapshot();
    let target_language = request
        .target_language
        .unwrap_or_else(|| settings.target_language.clone());
    let llm_provider = request
        .llm_provider
        .unwrap_or_else(|| settings.default_llm.clone());

    let watcher =
        watchers::insert(&state.db, &request.path, &target_language, &llm_provider).await?;

    if let Err(e) = state.supervisor.enable(&watcher).await {
        // Roll the row back; a watcher that cannot watch is useless.
        error!(path = %request.path, "Failed to start watcher: {e}");
        watchers::delete(&state.db, watcher.id).await?;
        return Err(ApiError::Internal(e.to_string()));
    }

    Ok(Json(watcher))
}

async fn delete_watcher(
    State(state): State<AppState>,
    Path(watcher_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if watchers::get(&state.db, watcher_id).await?.is_none() {
        return Err(ApiError::NotFound("Watcher not found".to_string()));
    }
    state.supervisor.disable(watcher_id);
    watchers::delete(&state.db, watcher_id).await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn toggle_watcher(
    State(state): State<AppState>,
    Path(watcher_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let watcher = watchers::get(&state.db, watcher_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Watcher not found".to_string()))?;

    let enabled = !watcher.enabled;
    watchers::set_enabled(&state.db, watcher_id, enabled).await?;

    if enabled {
        if let Err(e) = state.supervisor.enable(&watcher).await {
            watchers::set_enabled(&state.db, watcher_id, false).await?;
            return Err(ApiError::Internal(e.to_string()));
        }
    } else {
        state.supervisor.disable(watcher_id);
    }

    Ok(Json(json!({"enabled": enabled})))
}
