use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{
    Appointment, AppointmentDetails, AppointmentStatus, ConfirmedVisit, CreateAppointment,
};
use crate::error::{AppError, AppResult};
use crate::i18n;

const DETAILS_SELECT: &str = r#"
    SELECT
        a.id,
        a.start_time,
        a.end_time,
        a.status,
        a.external_event_id,
        p.full_name AS patient_full_name,
        p.email AS patient_email,
        p.phone AS patient_phone,
        s.name AS service_name
    FROM appointments a
    LEFT JOIN patients p ON p.id = a.patient_id
    LEFT JOIN services s ON s.id = a.service_id
"#;

pub struct AppointmentRepository;

impl AppointmentRepository {
    /// Insert a pending appointment.
    ///
    /// The insert only happens when no pending or confirmed appointment
    /// overlaps `[start_time, end_time)`; otherwise, or when the partial unique
    /// index on the start instant trips, the result is `Conflict`.
    pub async fn create(pool: &SqlitePool, appt: CreateAppointment) -> AppResult<Appointment> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let created = sqlx::query_as::<_, Appointment>(
            r#"
            INSERT INTO appointments (
                id, patient_id, service_id, start_time, end_time, status,
                external_event_id, created_at, updated_at
            )
            SELECT ?, ?, ?, ?, ?, ?, NULL, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM appointments
                WHERE status IN ('pending', 'confirmed')
                  AND start_time < ?
                  AND end_time > ?
            )
            RETURNING
                id, patient_id, service_id, start_time, end_time, status,
                external_event_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(appt.patient_id)
        .bind(appt.service_id)
        .bind(appt.start_time)
        .bind(appt.end_time)
        .bind(AppointmentStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .bind(appt.end_time)
        .bind(appt.start_time)
        .fetch_optional(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(i18n::t("booking.already_taken"))
            }
            other => AppError::Database(other),
        })?;

        created.ok_or_else(|| AppError::Conflict(i18n::t("booking.already_taken")))
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Appointment>> {
        sqlx::query_as::<_, Appointment>(
            r#"
            SELECT
                id, patient_id, service_id, start_time, end_time, status,
                external_event_id, created_at, updated_at
            FROM appointments
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Appointment joined with patient and service.
    pub async fn find_details(
        pool: &SqlitePool,
        id: &str,
    ) -> AppResult<Option<AppointmentDetails>> {
        let sql = format!("{DETAILS_SELECT} WHERE a.id = ?");
        sqlx::query_as::<_, AppointmentDetails>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Pending or confirmed appointments overlapping `[from, to)`.
    pub async fn list_active_between(
        pool: &SqlitePool,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Appointment>> {
        sqlx::query_as::<_, Appointment>(
            r#"
            SELECT
                id, patient_id, service_id, start_time, end_time, status,
                external_event_id, created_at, updated_at
            FROM appointments
            WHERE status IN ('pending', 'confirmed')
              AND start_time < ?
              AND end_time > ?
            ORDER BY start_time
            "#,
        )
        .bind(to)
        .bind(from)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Every appointment starting in `[from, to)`, any status, with details.
    pub async fn list_details_between(
        pool: &SqlitePool,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<AppointmentDetails>> {
        let sql = format!(
            "{DETAILS_SELECT} WHERE a.start_time >= ? AND a.start_time < ? ORDER BY a.start_time"
        );
        sqlx::query_as::<_, AppointmentDetails>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Every appointment of a patient, newest first.
    pub async fn list_details_for_patient(
        pool: &SqlitePool,
        patient_id: &str,
    ) -> AppResult<Vec<AppointmentDetails>> {
        let sql = format!("{DETAILS_SELECT} WHERE a.patient_id = ? ORDER BY a.start_time DESC");
        sqlx::query_as::<_, AppointmentDetails>(&sql)
            .bind(patient_id)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn list_confirmed_visits(pool: &SqlitePool) -> AppResult<Vec<ConfirmedVisit>> {
        sqlx::query_as::<_, ConfirmedVisit>(
            r#"
            SELECT
                a.patient_id,
                a.start_time,
                s.name AS service_name,
                s.price AS service_price
            FROM appointments a
            LEFT JOIN services s ON s.id = a.service_id
            WHERE a.status = 'confirmed'
            ORDER BY a.start_time
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Move a pending appointment to `status`.
    ///
    /// Returns `None` when the appointment does not exist or is no longer
    /// pending, so each appointment transitions at most once.
    pub async fn transition_from_pending(
        pool: &SqlitePool,
        id: &str,
        status: AppointmentStatus,
    ) -> AppResult<Option<Appointment>> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Appointment>(
            r#"
            UPDATE appointments
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            RETURNING
                id, patient_id, service_id, start_time, end_time, status,
                external_event_id, created_at, updated_at
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Record the external event id. Only the first writer wins; returns false
    /// if an id was already stored.
    pub async fn set_external_event_id(
        pool: &SqlitePool,
        id: &str,
        external_event_id: &str,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE appointments
            SET external_event_id = ?, updated_at = ?
            WHERE id = ? AND external_event_id IS NULL
            "#,
        )
        .bind(external_event_id)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
