use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::AppointmentStatus;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub patient_id: Option<String>,
    pub service_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// 'pending', 'confirmed' or 'rejected'
    pub status: String,
    /// Id of the event on the external calendar, set once synchronized.
    pub external_event_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    pub fn status(&self) -> Option<AppointmentStatus> {
        AppointmentStatus::from_str(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct CreateAppointment {
    pub patient_id: String,
    pub service_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Appointment joined with its patient and service.
///
/// Everything the joins may fail to produce is optional; the synchronizer
/// decides what is required.
#[derive(Debug, Clone, Default, FromRow, Serialize)]
pub struct AppointmentDetails {
    pub id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: String,
    pub external_event_id: Option<String>,
    pub patient_full_name: Option<String>,
    pub patient_email: Option<String>,
    pub patient_phone: Option<String>,
    pub service_name: Option<String>,
}

impl AppointmentDetails {
    pub fn status(&self) -> Option<AppointmentStatus> {
        AppointmentStatus::from_str(&self.status)
    }
}

/// A confirmed appointment with the service fields the statistics need.
#[derive(Debug, Clone, FromRow)]
pub struct ConfirmedVisit {
    pub patient_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub service_name: Option<String>,
    pub service_price: Option<i64>,
}
