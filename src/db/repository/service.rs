use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::Service;
use crate::error::{AppError, AppResult};

pub struct ServiceRepository;

impl ServiceRepository {
    pub async fn create(
        pool: &SqlitePool,
        name: &str,
        description: Option<&str>,
        price: i64,
        duration_min: i64,
    ) -> AppResult<Service> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();

        sqlx::query_as::<_, Service>(
            r#"
            INSERT INTO services (id, name, description, price, duration_min, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            RETURNING id, name, description, price, duration_min, is_active, created_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(price)
        .bind(duration_min)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Service>> {
        sqlx::query_as::<_, Service>(
            r#"
            SELECT id, name, description, price, duration_min, is_active, created_at
            FROM services
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Services offered to the public.
    pub async fn list_active(pool: &SqlitePool) -> AppResult<Vec<Service>> {
        sqlx::query_as::<_, Service>(
            r#"
            SELECT id, name, description, price, duration_min, is_active, created_at
            FROM services
            WHERE is_active = 1
            ORDER BY name
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<Service>> {
        sqlx::query_as::<_, Service>(
            r#"
            SELECT id, name, description, price, duration_min, is_active, created_at
            FROM services
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn set_active(
        pool: &SqlitePool,
        id: &str,
        is_active: bool,
    ) -> AppResult<Option<Service>> {
        sqlx::query_as::<_, Service>(
            r#"
            UPDATE services
            SET is_active = ?
            WHERE id = ?
            RETURNING id, name, description, price, duration_min, is_active, created_at
            "#,
        )
        .bind(is_active)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Returns true if a row was deleted. Appointments keep existing with no service.
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn inactive_services_are_hidden() {
        let pool = test_pool().await;
        let therapy = ServiceRepository::create(&pool, "Terapia", None, 120_000, 60)
            .await
            .unwrap();
        ServiceRepository::create(&pool, "Evaluación", Some("Primera cita"), 90_000, 90)
            .await
            .unwrap();

        ServiceRepository::set_active(&pool, &therapy.id, false)
            .await
            .unwrap()
            .unwrap();

        let active = ServiceRepository::list_active(&pool).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Evaluación");
        assert_eq!(ServiceRepository::list_all(&pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn set_active_on_unknown_id_is_none() {
        let pool = test_pool().await;
        let updated = ServiceRepository::set_active(&pool, "missing", true)
            .await
            .unwrap();
        assert!(updated.is_none());
    }
}
