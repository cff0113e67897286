//! Completed-translation records, consulted by the skip oracle.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::Result;

/// Record a successful translation. Re-translating the same pair (e.g. after
/// force override) replaces the previous record.
pub async fn record(
    pool: &SqlitePool,
    file_path: &str,
    target_language: &str,
    output_path: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO translated_files
             (file_path, target_language, output_path, translated_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(file_path)
    .bind(target_language)
    .bind(output_path)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn exists(pool: &SqlitePool, file_path: &str, target_language: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM translated_files WHERE file_path = ? AND target_language = ?",
    )
    .bind(file_path)
    .bind(target_language)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_record_and_lookup() {
        let pool = test_pool().await;
        assert!(!exists(&pool, "/m/a.mkv", "Chinese").await.unwrap());

        record(&pool, "/m/a.mkv", "Chinese", "/m/a.zh-Hans.srt")
            .await
            .unwrap();
        assert!(exists(&pool, "/m/a.mkv", "Chinese").await.unwrap());
        assert!(!exists(&pool, "/m/a.mkv", "Japanese").await.unwrap());

        // Upsert keeps a single row per pair.
        record(&pool, "/m/a.mkv", "Chinese", "/m/a.translated.mkv")
            .await
            .unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM translated_files")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
