use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateWorkShift, WorkShift};
use crate::error::{AppError, AppResult};

pub struct WorkShiftRepository;

impl WorkShiftRepository {
    pub async fn create(pool: &SqlitePool, shift: CreateWorkShift) -> AppResult<WorkShift> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, WorkShift>(
            r#"
            INSERT INTO work_shifts (id, day_of_week, start_time, end_time, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, day_of_week, start_time, end_time, created_at
            "#,
        )
        .bind(id)
        .bind(shift.day_of_week)
        .bind(shift.start_time)
        .bind(shift.end_time)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// All shifts, ordered by weekday then start time.
    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<WorkShift>> {
        sqlx::query_as::<_, WorkShift>(
            r#"
            SELECT id, day_of_week, start_time, end_time, created_at
            FROM work_shifts
            ORDER BY day_of_week, start_time
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Shifts configured for a weekday (0 = Sunday).
    pub async fn list_for_day(pool: &SqlitePool, day_of_week: i64) -> AppResult<Vec<WorkShift>> {
        sqlx::query_as::<_, WorkShift>(
            r#"
            SELECT id, day_of_week, start_time, end_time, created_at
            FROM work_shifts
            WHERE day_of_week = ?
            ORDER BY start_time
            "#,
        )
        .bind(day_of_week)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Returns true if a row was deleted.
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM work_shifts WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
