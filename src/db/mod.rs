//! SQLite persistence: connection pool, schema, and per-entity stores.

pub mod history;
pub mod settings;
pub mod tasks;
pub mod watchers;

use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

use crate::error::Result;

/// Open (creating if needed) the application database and ensure the schema.
pub async fn init_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables and indexes if they do not exist.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            progress INTEGER NOT NULL DEFAULT 0,
            source_language TEXT,
            target_language TEXT NOT NULL,
            llm_provider TEXT NOT NULL,
            subtitle_track INTEGER,
            force_override INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS watchers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            enabled INTEGER NOT NULL DEFAULT 1,
            target_language TEXT NOT NULL,
            llm_provider TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS app_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Completed translations, consulted by the skip oracle.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS translated_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL,
            target_language TEXT NOT NULL,
            output_path TEXT,
            translated_at TEXT NOT NULL,
            UNIQUE(file_path, target_language)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_file_language
         ON tasks(file_path, target_language)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_translated_files_lookup
         ON translated_files(file_path, target_language)",
    )
    .execute(pool)
    .await?;

    info!("Database schema ready");
    Ok(())
}

// In-memory SQLite gives every connection its own database, so the test
// pool is pinned to a single connection.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_tables(&pool).await.unwrap();
    pool
}
