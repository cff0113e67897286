//! Filesystem browsing endpoints for the UI's file picker.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::{ApiError, ApiResult, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/files/browse", get(browse))
        .route("/api/files/subtitle-tracks", get(subtitle_tracks))
}

#[derive(Debug, Deserialize)]
pub struct BrowseQuery {
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            let rest = rest.trim_start_matches('/');
            return if rest.is_empty() {
                PathBuf::from(home)
            } else {
                Path::new(&home).join(rest)
            };
        }
    }
    PathBuf::from(path)
}

async fn browse(
    State(_state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> ApiResult<Json<Value>> {
    let raw = query.path.unwrap_or_else(|| "~".to_string());
    let path = expand_home(&raw);
    let path = std::path::absolute(&path).unwrap_or(path);

    if !path.exists() {
        return Err(ApiError::NotFound("Path not found".to_string()));
    }
    if !path.is_dir() {
        return Err(ApiError::BadRequest("Path is not a directory".to_string()));
    }

    let entries = std::fs::read_dir(&path)
        .map_err(|e| ApiError::Internal(format!("Cannot read directory: {e}")))?;

    let mut items = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let full = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let is_dir = metadata.is_dir();
        let supported = full
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_lowercase().as_str(), "mkv" | "srt" | "ass"))
            .unwrap_or(false);
        if !is_dir && !supported {
            continue;
        }
        items.push(FileInfo {
            name,
            path: full.to_string_lossy().into_owned(),
            is_dir,
            size: if is_dir { None } else { Some(metadata.len()) },
        });
    }

    // Directories first, each group alphabetical.
    items.sort_by(|a, b| {
        (!a.is_dir, a.name.to_lowercase()).cmp(&(!b.is_dir, b.name.to_lowercase()))
    });

    let parent_path = if path == Path::new("/") {
        None
    } else {
        path.parent().map(|p| p.to_string_lossy().into_owned())
    };

    Ok(Json(json!({
        "current_path": path.to_string_lossy(),
        "parent_path": parent_path,
        "items": items,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SubtitleTracksQuery {
    pub file_path: String,
}

async fn subtitle_tracks(
    State(state): State<AppState>,
    Query(query): Query<SubtitleTracksQuery>,
) -> ApiResult<Json<Value>> {
    let path = PathBuf::from(&query.file_path);
    if !path.exists() {
        return Err(ApiError::NotFound("File not found".to_string()));
    }

    let tracks = state
        .toolbox
        .list_tracks(&path)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "file_path": query.file_path,
        "tracks": tracks,
    })))
}
