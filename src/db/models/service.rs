use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A bookable service. `duration_min` sets the end of appointments booked for it.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub duration_min: i64,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}
