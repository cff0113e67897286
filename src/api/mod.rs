//! HTTP and WebSocket surface.

pub mod files;
pub mod settings;
pub mod tasks;
pub mod watchers;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

use crate::config::SettingsStore;
use crate::error::AppError;
use crate::events::ProgressBus;
use crate::media::MediaToolbox;
use crate::scheduler::TaskScheduler;
use crate::skip::SkipOracle;
use crate::watcher::WatcherSupervisor;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub settings: Arc<SettingsStore>,
    pub scheduler: Arc<TaskScheduler>,
    pub supervisor: Arc<WatcherSupervisor>,
    pub oracle: Arc<SkipOracle>,
    pub toolbox: Arc<dyn MediaToolbox>,
    pub bus: ProgressBus,
}

/// API error type mapped to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::User(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };
        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Assemble the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api", get(api_info))
        .route("/health", get(health))
        .merge(tasks::routes())
        .merge(files::routes())
        .merge(watchers::routes())
        .merge(settings::routes())
        .route("/ws/progress", get(ws::progress_socket))
        .with_state(state)
}

async fn api_info() -> Json<serde_json::Value> {
    Json(json!({
        "name": "subtrans",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Subtitle Translation Service",
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy"}))
}
