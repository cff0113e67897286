//! Task rows: the persistent mirror of scheduler state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Paused => "paused",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            "paused" => Some(TaskStatus::Paused),
            _ => None,
        }
    }

    /// Active statuses count toward the one-task-per-(file, language) rule.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Processing | TaskStatus::Paused
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub status: TaskStatus,
    pub progress: i64,
    pub source_language: Option<String>,
    pub target_language: String,
    pub llm_provider: String,
    pub subtitle_track: Option<i64>,
    pub force_override: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields supplied when enqueueing a new task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub file_path: String,
    pub file_name: String,
    pub target_language: String,
    pub llm_provider: String,
    pub subtitle_track: Option<i64>,
    pub force_override: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct TaskStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub paused: i64,
    pub total: i64,
}

pub async fn insert(pool: &SqlitePool, new: &NewTask) -> Result<Task> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO tasks
            (file_path, file_name, status, progress, target_language,
             llm_provider, subtitle_track, force_override, created_at, updated_at)
        VALUES (?, ?, 'pending', 0, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&new.file_path)
    .bind(&new.file_name)
    .bind(&new.target_language)
    .bind(&new.llm_provider)
    .bind(new.subtitle_track)
    .bind(new.force_override)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let task = get(pool, result.last_insert_rowid())
        .await?
        .expect("row just inserted");
    Ok(task)
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(task)
}

pub async fn get_status(pool: &SqlitePool, id: i64) -> Result<Option<TaskStatus>> {
    let row: Option<(TaskStatus,)> = sqlx::query_as("SELECT status FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(s,)| s))
}

/// Paginated listing, newest first, with the unfiltered/filtered total.
pub async fn list(
    pool: &SqlitePool,
    status: Option<TaskStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Task>, i64)> {
    let (tasks, total) = match status {
        Some(status) => {
            let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE status = ?")
                .bind(status)
                .fetch_one(pool)
                .await?;
            let tasks = sqlx::query_as::<_, Task>(
                "SELECT * FROM tasks WHERE status = ?
                 ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;
            (tasks, total.0)
        }
        None => {
            let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks")
                .fetch_one(pool)
                .await?;
            let tasks = sqlx::query_as::<_, Task>(
                "SELECT * FROM tasks ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;
            (tasks, total.0)
        }
    };
    Ok((tasks, total))
}

pub async fn stats(pool: &SqlitePool) -> Result<TaskStats> {
    let rows: Vec<(TaskStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .fetch_all(pool)
            .await?;

    let mut stats = TaskStats::default();
    for (status, count) in rows {
        match status {
            TaskStatus::Pending => stats.pending = count,
            TaskStatus::Processing => stats.processing = count,
            TaskStatus::Completed => stats.completed = count,
            TaskStatus::Failed => stats.failed = count,
            TaskStatus::Cancelled => stats.cancelled = count,
            TaskStatus::Paused => stats.paused = count,
        }
        stats.total += count;
    }
    Ok(stats)
}

/// Atomically claim the oldest pending task, marking it processing.
pub async fn claim_next_pending(pool: &SqlitePool) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE tasks
        SET status = 'processing', updated_at = ?
        WHERE id = (
            SELECT id FROM tasks WHERE status = 'pending' ORDER BY id ASC LIMIT 1
        )
        RETURNING id
        "#,
    )
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(id,)| id))
}

/// Whether an active task already exists for this file/language pair.
pub async fn has_active(pool: &SqlitePool, file_path: &str, target_language: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM tasks
         WHERE file_path = ? AND target_language = ?
           AND status IN ('pending', 'processing', 'paused')
         LIMIT 1",
    )
    .bind(file_path)
    .bind(target_language)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Set a task's status, optionally with an error message. Completion also
/// pins progress to 100 and stamps `completed_at`; failure keeps the last
/// reported progress.
pub async fn set_status(
    pool: &SqlitePool,
    id: i64,
    status: TaskStatus,
    error_message: Option<&str>,
) -> Result<()> {
    let now = Utc::now();
    match status {
        TaskStatus::Completed => {
            sqlx::query(
                "UPDATE tasks
                 SET status = ?, progress = 100, error_message = NULL,
                     updated_at = ?, completed_at = ?
                 WHERE id = ?",
            )
            .bind(status)
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
        }
        _ => {
            sqlx::query(
                "UPDATE tasks SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
            )
            .bind(status)
            .bind(error_message)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

pub async fn set_progress(pool: &SqlitePool, id: i64, progress: i64) -> Result<()> {
    sqlx::query("UPDATE tasks SET progress = ?, updated_at = ? WHERE id = ?")
        .bind(progress)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Re-enqueue a failed/cancelled/paused task. Returns false when the task is
/// in a state that cannot be retried. `reset_progress` is false when resuming
/// from a pause checkpoint.
pub async fn requeue(pool: &SqlitePool, id: i64, reset_progress: bool) -> Result<bool> {
    let result = if reset_progress {
        sqlx::query(
            "UPDATE tasks
             SET status = 'pending', progress = 0, error_message = NULL, updated_at = ?
             WHERE id = ? AND status IN ('failed', 'cancelled', 'paused')",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?
    } else {
        sqlx::query(
            "UPDATE tasks
             SET status = 'pending', error_message = NULL, updated_at = ?
             WHERE id = ? AND status IN ('failed', 'cancelled', 'paused')",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?
    };
    Ok(result.rows_affected() > 0)
}

/// Mark all (or the selected) pending tasks paused. Returns rows affected.
pub async fn pause_pending(pool: &SqlitePool, ids: Option<&[i64]>) -> Result<u64> {
    let result = match ids {
        None => {
            sqlx::query("UPDATE tasks SET status = 'paused', updated_at = ? WHERE status = 'pending'")
                .bind(Utc::now())
                .execute(pool)
                .await?
        }
        Some(ids) => {
            let placeholders = placeholders(ids.len());
            let sql = format!(
                "UPDATE tasks SET status = 'paused', updated_at = ?
                 WHERE id IN ({placeholders}) AND status = 'pending'"
            );
            let mut query = sqlx::query(&sql).bind(Utc::now());
            for id in ids {
                query = query.bind(id);
            }
            query.execute(pool).await?
        }
    };
    Ok(result.rows_affected())
}

/// Mark all (or the selected) processing tasks cancelled. Returns rows
/// affected. The owning worker observes the cancel signal separately.
pub async fn cancel_processing(pool: &SqlitePool, ids: Option<&[i64]>) -> Result<u64> {
    let result = match ids {
        None => sqlx::query(
            "UPDATE tasks SET status = 'cancelled', updated_at = ? WHERE status = 'processing'",
        )
        .bind(Utc::now())
        .execute(pool)
        .await?,
        Some(ids) => {
            let placeholders = placeholders(ids.len());
            let sql = format!(
                "UPDATE tasks SET status = 'cancelled', updated_at = ?
                 WHERE id IN ({placeholders}) AND status = 'processing'"
            );
            let mut query = sqlx::query(&sql).bind(Utc::now());
            for id in ids {
                query = query.bind(id);
            }
            query.execute(pool).await?
        }
    };
    Ok(result.rows_affected())
}

/// Delete all (or the selected) tasks that are not currently processing.
pub async fn delete_non_processing(pool: &SqlitePool, ids: Option<&[i64]>) -> Result<u64> {
    let result = match ids {
        None => sqlx::query("DELETE FROM tasks WHERE status != 'processing'")
            .execute(pool)
            .await?,
        Some(ids) => {
            let placeholders = placeholders(ids.len());
            let sql =
                format!("DELETE FROM tasks WHERE id IN ({placeholders}) AND status != 'processing'");
            let mut query = sqlx::query(&sql);
            for id in ids {
                query = query.bind(id);
            }
            query.execute(pool).await?
        }
    };
    Ok(result.rows_affected())
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Crash recovery: anything left processing from a previous run goes back to
/// pending. Returns the number of recovered tasks.
pub async fn recover_processing(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'pending', updated_at = ? WHERE status = 'processing'",
    )
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn new_task(path: &str) -> NewTask {
        NewTask {
            file_path: path.to_string(),
            file_name: path.rsplit('/').next().unwrap().to_string(),
            target_language: "Chinese".to_string(),
            llm_provider: "openai".to_string(),
            subtitle_track: None,
            force_override: false,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let pool = test_pool().await;
        let task = insert(&pool, &new_task("/m/a.mkv")).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.file_name, "a.mkv");
        assert!(task.completed_at.is_none());

        let fetched = get(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(fetched.file_path, "/m/a.mkv");
    }

    #[tokio::test]
    async fn test_claim_is_fifo() {
        let pool = test_pool().await;
        let first = insert(&pool, &new_task("/m/a.mkv")).await.unwrap();
        let second = insert(&pool, &new_task("/m/b.mkv")).await.unwrap();

        assert_eq!(claim_next_pending(&pool).await.unwrap(), Some(first.id));
        assert_eq!(claim_next_pending(&pool).await.unwrap(), Some(second.id));
        assert_eq!(claim_next_pending(&pool).await.unwrap(), None);

        let claimed = get(&pool, first.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn test_has_active_covers_paused() {
        let pool = test_pool().await;
        let task = insert(&pool, &new_task("/m/a.mkv")).await.unwrap();
        assert!(has_active(&pool, "/m/a.mkv", "Chinese").await.unwrap());

        set_status(&pool, task.id, TaskStatus::Paused, None).await.unwrap();
        assert!(has_active(&pool, "/m/a.mkv", "Chinese").await.unwrap());

        set_status(&pool, task.id, TaskStatus::Failed, Some("boom")).await.unwrap();
        assert!(!has_active(&pool, "/m/a.mkv", "Chinese").await.unwrap());
        assert!(!has_active(&pool, "/m/a.mkv", "Japanese").await.unwrap());
    }

    #[tokio::test]
    async fn test_completion_pins_progress_and_timestamp() {
        let pool = test_pool().await;
        let task = insert(&pool, &new_task("/m/a.mkv")).await.unwrap();
        set_progress(&pool, task.id, 40).await.unwrap();
        set_status(&pool, task.id, TaskStatus::Completed, None).await.unwrap();

        let done = get(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(done.progress, 100);
        assert!(done.completed_at.is_some());
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn test_requeue_rules() {
        let pool = test_pool().await;
        let task = insert(&pool, &new_task("/m/a.mkv")).await.unwrap();

        // Pending tasks cannot be retried.
        assert!(!requeue(&pool, task.id, true).await.unwrap());

        set_status(&pool, task.id, TaskStatus::Failed, Some("boom")).await.unwrap();
        set_progress(&pool, task.id, 57).await.unwrap();
        assert!(requeue(&pool, task.id, true).await.unwrap());

        let again = get(&pool, task.id).await.unwrap().unwrap();
        assert_eq!(again.status, TaskStatus::Pending);
        assert_eq!(again.progress, 0);
        assert!(again.error_message.is_none());
    }

    #[tokio::test]
    async fn test_batch_operations_and_recovery() {
        let pool = test_pool().await;
        let a = insert(&pool, &new_task("/m/a.mkv")).await.unwrap();
        let b = insert(&pool, &new_task("/m/b.mkv")).await.unwrap();
        let c = insert(&pool, &new_task("/m/c.mkv")).await.unwrap();
        set_status(&pool, c.id, TaskStatus::Processing, None).await.unwrap();

        assert_eq!(pause_pending(&pool, Some(&[a.id])).await.unwrap(), 1);
        assert_eq!(pause_pending(&pool, None).await.unwrap(), 1); // only b left pending
        assert_eq!(cancel_processing(&pool, None).await.unwrap(), 1);

        // c is now cancelled, a and b paused; everything can be deleted.
        assert_eq!(delete_non_processing(&pool, None).await.unwrap(), 3);

        let d = insert(&pool, &new_task("/m/d.mkv")).await.unwrap();
        set_status(&pool, d.id, TaskStatus::Processing, None).await.unwrap();
        assert_eq!(recover_processing(&pool).await.unwrap(), 1);
        assert_eq!(
            get_status(&pool, d.id).await.unwrap(),
            Some(TaskStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_stats_and_list_pagination() {
        let pool = test_pool().await;
        for i in 0..5 {
            insert(&pool, &new_task(&format!("/m/{i}.mkv"))).await.unwrap();
        }
        let stats = stats(&pool).await.unwrap();
        assert_eq!(stats.pending, 5);
        assert_eq!(stats.total, 5);

        let (page, total) = list(&pool, None, 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(total, 5);

        let (filtered, total) = list(&pool, Some(TaskStatus::Failed), 10, 0).await.unwrap();
        assert!(filtered.is_empty());
        assert_eq!(total, 0);
    }
}
