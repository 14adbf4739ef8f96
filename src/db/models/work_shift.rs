use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A contiguous interval of working hours on one weekday, in provider-local
/// wall-clock time. `day_of_week` uses 0 = Sunday.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkShift {
    pub id: String,
    pub day_of_week: i64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkShift {
    pub day_of_week: i64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}
