//! Watcher rows: persistent directives to ingest new files from a directory.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Watcher {
    pub id: i64,
    pub path: String,
    pub enabled: bool,
    pub target_language: String,
    pub llm_provider: String,
    pub created_at: DateTime<Utc>,
}

pub async fn insert(
    pool: &SqlitePool,
    path: &str,
    target_language: &str,
    llm_provider: &str,
) -> Result<Watcher> {
    let result = sqlx::query(
        "INSERT INTO watchers (path, enabled, target_language, llm_provider, created_at)
         VALUES (?, 1, ?, ?, ?)",
    )
    .bind(path)
    .bind(target_language)
    .bind(llm_provider)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let watcher = get(pool, result.last_insert_rowid())
        .await?
        .expect("row just inserted");
    Ok(watcher)
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Watcher>> {
    let watcher = sqlx::query_as::<_, Watcher>("SELECT * FROM watchers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(watcher)
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<Watcher>> {
    let watchers =
        sqlx::query_as::<_, Watcher>("SELECT * FROM watchers ORDER BY created_at DESC, id DESC")
            .fetch_all(pool)
            .await?;
    Ok(watchers)
}

pub async fn list_enabled(pool: &SqlitePool) -> Result<Vec<Watcher>> {
    let watchers =
        sqlx::query_as::<_, Watcher>("SELECT * FROM watchers WHERE enabled = 1 ORDER BY id ASC")
            .fetch_all(pool)
            .await?;
    Ok(watchers)
}

/// At most one watcher per path, enabled or not.
pub async fn exists_for_path(pool: &SqlitePool, path: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM watchers WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub async fn set_enabled(pool: &SqlitePool, id: i64, enabled: bool) -> Result<()> {
    sqlx::query("UPDATE watchers SET enabled = ? WHERE id = ?")
        .bind(enabled)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM watchers WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
