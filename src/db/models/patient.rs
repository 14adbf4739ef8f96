use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: NaiveDateTime,
}
