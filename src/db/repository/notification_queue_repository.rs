use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateNotificationTask, NotificationTask};
use crate::error::{AppError, AppResult};

const TASK_COLUMNS: &str = r#"
    id,
    appointment_id,
    recipient,
    subject,
    body,
    attempts,
    max_attempts,
    next_attempt_at,
    expires_at,
    last_error,
    status,
    created_at,
    updated_at
"#;

/// Repository for the persistent email retry queue.
///
/// Implementation notes:
/// - Claiming uses an atomic single-statement UPDATE with a subselect:
///   `UPDATE ... WHERE id = (SELECT id FROM ... LIMIT 1) RETURNING ...`
///   This avoids a long-lived transaction and reduces contention on SQLite.
/// - Claims skip expired tasks (`expires_at` set and in the past).
pub struct NotificationQueueRepository;

impl NotificationQueueRepository {
    /// Create a new queued notification task.
    ///
    /// `max_attempts` defaults to 5 and `next_attempt_at` to now.
    pub async fn create(
        pool: &SqlitePool,
        task: CreateNotificationTask,
    ) -> AppResult<NotificationTask> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let next_attempt_at = task.next_attempt_at.unwrap_or(now);
        let max_attempts = task.max_attempts.unwrap_or(5);
        let status = task.status.unwrap_or_else(|| "pending".to_string());

        let sql = format!(
            r#"
            INSERT INTO notification_queue (
                id,
                appointment_id,
                recipient,
                subject,
                body,
                attempts,
                max_attempts,
                next_attempt_at,
                expires_at,
                last_error,
                status,
                created_at,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, NULL, ?, ?, ?)
            RETURNING {TASK_COLUMNS}
            "#
        );

        sqlx::query_as::<_, NotificationTask>(&sql)
            .bind(id)
            .bind(task.appointment_id)
            .bind(task.recipient)
            .bind(task.subject)
            .bind(task.body)
            .bind(max_attempts)
            .bind(next_attempt_at)
            .bind(task.expires_at)
            .bind(status)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Claim up to `limit` due (non-expired) tasks and return them.
    ///
    /// Each statement claims a single task; the loop stops at the first
    /// empty claim.
    pub async fn fetch_and_claim_due(
        pool: &SqlitePool,
        limit: i64,
    ) -> AppResult<Vec<NotificationTask>> {
        let mut tasks: Vec<NotificationTask> = Vec::new();
        if limit <= 0 {
            return Ok(tasks);
        }

        let sql = format!(
            r#"
            UPDATE notification_queue
            SET status = 'processing', updated_at = ?
            WHERE id = (
                SELECT id FROM notification_queue
                WHERE status = 'pending'
                  AND next_attempt_at <= ?
                  AND (expires_at IS NULL OR expires_at > ?)
                ORDER BY next_attempt_at ASC
                LIMIT 1
            )
            RETURNING {TASK_COLUMNS}
            "#
        );

        for _ in 0..(limit as usize) {
            let now = Utc::now().naive_utc();

            let opt = sqlx::query_as::<_, NotificationTask>(&sql)
                .bind(now)
                .bind(now)
                .bind(now)
                .fetch_optional(pool)
                .await
                .map_err(AppError::Database)?;

            if let Some(task) = opt {
                tasks.push(task);
            } else {
                break;
            }
        }

        Ok(tasks)
    }

    /// Mark a task as succeeded. Returns the updated task row.
    pub async fn mark_succeeded(pool: &SqlitePool, id: &str) -> AppResult<NotificationTask> {
        let now = Utc::now().naive_utc();
        let sql = format!(
            r#"
            UPDATE notification_queue
            SET status = 'succeeded', attempts = attempts + 1, last_error = NULL, updated_at = ?
            WHERE id = ?
            RETURNING {TASK_COLUMNS}
            "#
        );

        sqlx::query_as::<_, NotificationTask>(&sql)
            .bind(now)
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Increment attempts, set `next_attempt_at` and `last_error`. If the
    /// new attempt count reaches `max_attempts`, the task moves to 'dead'.
    pub async fn register_attempt_and_schedule(
        pool: &SqlitePool,
        id: &str,
        next_attempt_at: NaiveDateTime,
        last_error: Option<String>,
    ) -> AppResult<NotificationTask> {
        let now = Utc::now().naive_utc();
        let sql = format!(
            r#"
            UPDATE notification_queue
            SET
                attempts = attempts + 1,
                next_attempt_at = ?,
                last_error = ?,
                status = CASE WHEN attempts + 1 >= max_attempts THEN 'dead' ELSE 'pending' END,
                updated_at = ?
            WHERE id = ?
            RETURNING {TASK_COLUMNS}
            "#
        );

        sqlx::query_as::<_, NotificationTask>(&sql)
            .bind(next_attempt_at)
            .bind(last_error)
            .bind(now)
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Mark the task as dead (moved to DLQ) and set the last error.
    pub async fn mark_dead(
        pool: &SqlitePool,
        id: &str,
        last_error: Option<String>,
    ) -> AppResult<NotificationTask> {
        let now = Utc::now().naive_utc();
        let sql = format!(
            r#"
            UPDATE notification_queue
            SET status = 'dead', last_error = ?, updated_at = ?
            WHERE id = ?
            RETURNING {TASK_COLUMNS}
            "#
        );

        sqlx::query_as::<_, NotificationTask>(&sql)
            .bind(last_error)
            .bind(now)
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Tasks belonging to an appointment, oldest first.
    pub async fn list_for_appointment(
        pool: &SqlitePool,
        appointment_id: &str,
    ) -> AppResult<Vec<NotificationTask>> {
        let sql = format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM notification_queue
            WHERE appointment_id = ?
            ORDER BY created_at ASC
            "#
        );

        sqlx::query_as::<_, NotificationTask>(&sql)
            .bind(appointment_id)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Fetch a task by id.
    #[cfg(test)]
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<NotificationTask> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM notification_queue WHERE id = ?");

        sqlx::query_as::<_, NotificationTask>(&sql)
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }
}
