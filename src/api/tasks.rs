//! Task endpoints: creation, listing, and lifecycle control.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path as FsPath, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use super::{ApiError, ApiResult, AppState};
use crate::db::tasks::{self, NewTask, Task, TaskStatus};
use crate::lang;
use crate::skip::SkipDecision;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/directory", post(create_directory_tasks))
        .route("/api/tasks/stats", get(task_stats))
        .route("/api/tasks/pause-all", post(pause_all))
        .route("/api/tasks/pause-selected", post(pause_selected))
        .route("/api/tasks/delete-all", delete(delete_all))
        .route("/api/tasks/delete-selected", post(delete_selected))
        .route("/api/tasks/:id", get(get_task).delete(delete_task))
        .route("/api/tasks/:id/retry", post(retry_task))
}

const SUPPORTED_EXTENSIONS: &[&str] = &["mkv", "srt", "ass"];

fn has_supported_extension(path: &FsPath) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Json<Value>> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            TaskStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown status: {raw}")))?,
        ),
    };
    let limit = query.limit.unwrap_or(20).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let (tasks, total) = tasks::list(&state.db, status, limit, offset).await?;
    Ok(Json(json!({
        "tasks": tasks,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

async fn task_stats(State(state): State<AppState>) -> ApiResult<Json<tasks::TaskStats>> {
    Ok(Json(tasks::stats(&state.db).await?))
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<Task>> {
    let task = tasks::get(&state.db, task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub file_path: String,
    pub target_language: Option<String>,
    pub llm_provider: Option<String>,
    pub subtitle_track: Option<i64>,
    #[serde(default)]
    pub force_override: bool,
}

async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<Json<Task>> {
    let path = PathBuf::from(&request.file_path);
    if !path.exists() {
        return Err(ApiError::NotFound("File not found".to_string()));
    }
    if !has_supported_extension(&path) {
        return Err(ApiError::BadRequest(
            "File must be an MKV, SRT, or ASS file".to_string(),
        ));
    }

    let settings = state.settings.snapshot();
    let target_language = request
        .target_language
        .unwrap_or_else(|| settings.target_language.clone());
    let llm_provider = request
        .llm_provider
        .unwrap_or_else(|| settings.default_llm.clone());

    match state
        .oracle
        .evaluate(&path, &target_language, request.force_override, &settings)
        .await?
    {
        SkipDecision::Proceed => {}
        SkipDecision::Skip(reason) => {
            return Err(ApiError::Conflict(format!("File skipped: {reason}")));
        }
    }

    let is_mkv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mkv"))
        .unwrap_or(false);

    let task = state
        .scheduler
        .submit(NewTask {
            file_path: request.file_path.clone(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            target_language,
            llm_provider,
            subtitle_track: if is_mkv { request.subtitle_track } else { None },
            force_override: request.force_override,
        })
        .await
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
pub struct DirectoryTaskRequest {
    pub directory_path: String,
    pub target_language: Option<String>,
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub force_override: bool,
}

async fn create_directory_tasks(
    State(state): State<AppState>,
    Json(request): Json<DirectoryTaskRequest>,
) -> ApiResult<Json<Value>> {
    let root = PathBuf::from(&request.directory_path);
    if !root.is_dir() {
        return Err(ApiError::NotFound("Directory not found".to_string()));
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if request.recursive {
        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_file() && is_translatable(path) {
                candidates.push(path.to_path_buf());
            }
        }
    } else {
        let entries = std::fs::read_dir(&root)
            .map_err(|e| ApiError::Internal(format!("Cannot read directory: {e}")))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && is_translatable(&path) {
                candidates.push(path);
            }
        }
    }

    if candidates.is_empty() {
        return Err(ApiError::NotFound(
            "No MKV, SRT, or ASS files found in directory".to_string(),
        ));
    }
    candidates.sort();

    let settings = state.settings.snapshot();
    let target_language = request
        .target_language
        .unwrap_or_else(|| settings.target_language.clone());
    let llm_provider = request
        .llm_provider
        .unwrap_or_else(|| settings.default_llm.clone());

    let mut task_ids = Vec::new();
    for path in candidates {
        let decision = state
            .oracle
            .evaluate(&path, &target_language, request.force_override, &settings)
            .await?;
        if let SkipDecision::Skip(reason) = decision {
            info!(path = %path.display(), %reason, "Directory create skipped file");
            continue;
        }

        let submitted = state
            .scheduler
            .submit(NewTask {
                file_path: path.to_string_lossy().into_owned(),
                file_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                target_language: target_language.clone(),
                llm_provider: llm_provider.clone(),
                subtitle_track: None,
                force_override: request.force_override,
            })
            .await;
        match submitted {
            Ok(task) => task_ids.push(task.id),
            Err(e) => info!(path = %path.display(), "Directory create refused file: {e}"),
        }
    }

    Ok(Json(json!({
        "created_count": task_ids.len(),
        "task_ids": task_ids,
    })))
}

fn is_translatable(path: &FsPath) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    has_supported_extension(path) && !lang::is_generated_output(&name)
}

async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if !state.scheduler.delete(task_id).await? {
        return Err(ApiError::NotFound("Task not found".to_string()));
    }
    Ok(Json(json!({"status": "ok"})))
}

async fn retry_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if tasks::get(&state.db, task_id).await?.is_none() {
        return Err(ApiError::NotFound("Task not found".to_string()));
    }
    if !state.scheduler.retry(task_id).await? {
        return Err(ApiError::BadRequest(
            "Only failed, cancelled, or paused tasks can be retried".to_string(),
        ));
    }
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
pub struct TaskIdList {
    pub task_ids: Vec<i64>,
}

async fn pause_all(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let paused = state.scheduler.pause_all(None).await?;
    Ok(Json(json!({"paused_count": paused})))
}

async fn pause_selected(
    State(state): State<AppState>,
    Json(request): Json<TaskIdList>,
) -> ApiResult<Json<Value>> {
    if request.task_ids.is_empty() {
        return Err(ApiError::BadRequest("No task IDs provided".to_string()));
    }
    let paused = state.scheduler.pause_all(Some(&request.task_ids)).await?;
    Ok(Json(json!({"paused_count": paused})))
}

async fn delete_all(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let (cancelled, deleted) = state.scheduler.delete_all(None).await?;
    Ok(Json(json!({
        "cancelled_count": cancelled,
        "deleted_count": deleted,
    })))
}

async fn delete_selected(
    State(state): State<AppState>,
    Json(request): Json<TaskIdList>,
) -> ApiResult<Json<Value>> {
    if request.task_ids.is_empty() {
        return Err(ApiError::BadRequest("No task IDs provided".to_string()));
    }
    let (cancelled, deleted) = state.scheduler.delete_all(Some(&request.task_ids)).await?;
    Ok(Json(json!({
        "cancelled_count": cancelled,
        "deleted_count": deleted,
    })))
}
