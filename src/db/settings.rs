//! Key-value persistence for the settings singleton.

use sqlx::SqlitePool;

use crate::error::Result;

pub async fn load_all(pool: &SqlitePool) -> Result<Vec<(String, String)>> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM app_settings")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM app_settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(v,)| v))
}

pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO app_settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_set_get_upsert() {
        let pool = test_pool().await;
        assert_eq!(get(&pool, "target_language").await.unwrap(), None);

        set(&pool, "target_language", "Chinese").await.unwrap();
        set(&pool, "target_language", "Japanese").await.unwrap();
        assert_eq!(
            get(&pool, "target_language").await.unwrap().as_deref(),
            Some("Japanese")
        );

        let all = load_all(&pool).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
