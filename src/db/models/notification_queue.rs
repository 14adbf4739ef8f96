use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A queued email delivery.
///
/// The rendered subject and body are stored so retries send exactly what the
/// first attempt sent, even if templates change in between.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationTask {
    /// Primary key (UUID)
    pub id: String,

    /// Appointment the email is about (if it still exists).
    pub appointment_id: Option<String>,

    pub recipient: String,
    pub subject: String,

    /// HTML body.
    pub body: String,

    /// Number of attempts already made.
    pub attempts: i32,

    /// Maximum attempts permitted before moving the task to DLQ.
    pub max_attempts: i32,

    /// Timestamp when the task becomes eligible for the next retry.
    pub next_attempt_at: NaiveDateTime,

    /// Optional expiration timestamp (TTL). Expired tasks are never sent.
    pub expires_at: Option<NaiveDateTime>,

    /// Last error message observed when an attempt failed (if any).
    pub last_error: Option<String>,

    /// Task status: 'pending', 'processing', 'succeeded', 'dead' (DLQ)
    pub status: String,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Data required to create a new queued notification task.
///
/// `max_attempts` and `next_attempt_at` default in the repository when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotificationTask {
    pub appointment_id: Option<String>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub max_attempts: Option<i32>,
    pub next_attempt_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
    /// Initial status; 'processing' when the caller delivers inline right away.
    pub status: Option<String>,
}
