use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::Patient;
use crate::error::{AppError, AppResult};

pub struct PatientRepository;

impl PatientRepository {
    /// Resolve a patient by email, creating it if needed.
    ///
    /// An existing patient keeps its id; name and phone are refreshed with the
    /// latest submitted values (an empty phone does not erase a stored one).
    pub async fn get_or_create(
        pool: &SqlitePool,
        full_name: &str,
        email: &str,
        phone: Option<&str>,
    ) -> AppResult<Patient> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().naive_utc();
        let email = email.trim().to_lowercase();

        sqlx::query_as::<_, Patient>(
            r#"
            INSERT INTO patients (id, full_name, email, phone, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(email) DO UPDATE SET
                full_name = excluded.full_name,
                phone = COALESCE(excluded.phone, patients.phone)
            RETURNING id, full_name, email, phone, created_at
            "#,
        )
        .bind(id)
        .bind(full_name.trim())
        .bind(email)
        .bind(phone.map(str::trim).filter(|p| !p.is_empty()))
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Patient>> {
        sqlx::query_as::<_, Patient>(
            "SELECT id, full_name, email, phone, created_at FROM patients WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }
}
