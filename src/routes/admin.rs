//! Operator endpoints: appointment decisions, calendar re-sync, working shifts,
//! the service catalog, patient history and practice statistics. Every handler
//! requires `OperatorAuth`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;

use crate::db::models::{
    AppointmentDetails, CreateWorkShift, NotificationTask, Service, WorkShift,
};
use crate::db::{NotificationQueueRepository, ServiceRepository, WorkShiftRepository};
use crate::error::{AppError, AppErrorWithDetails, AppResult};
use crate::routes::auth::OperatorAuth;
use crate::services::booking::{
    ActionOutcome, BookingAction, BookingService, BookingSynchronizer, PatientHistory,
    SyncOutcome,
};
use crate::services::stats::{PracticeStats, StatsService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/appointments", get(list_appointments))
        .route("/appointments/:id/actions", post(apply_action))
        .route("/appointments/:id/sync", post(sync_appointment))
        .route("/appointments/:id/notifications", get(list_notifications))
        .route("/shifts", get(list_shifts).post(create_shift))
        .route("/shifts/:id", delete(delete_shift))
        .route("/services", get(list_services).post(create_service))
        .route("/services/:id", delete(delete_service))
        .route("/services/:id/active", patch(set_service_active))
        .route("/patients/:id/appointments", get(patient_history))
        .route("/stats", get(practice_stats))
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ShiftRequest {
    pub day_of_week: i64,
    /// "HH:MM" or "HH:MM:SS", provider-local.
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
pub struct ServiceRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub duration_min: i64,
}

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub is_active: bool,
}

fn parse_wall_clock(field: &str, value: &str) -> AppResult<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| AppError::Validation(format!("{} must be HH:MM, got {:?}", field, value)))
}

impl ShiftRequest {
    fn validate(self) -> AppResult<CreateWorkShift> {
        if !(0..=6).contains(&self.day_of_week) {
            return Err(AppError::Validation(
                "day_of_week must be between 0 (Sunday) and 6".to_string(),
            ));
        }
        let start_time = parse_wall_clock("start_time", &self.start_time)?;
        let end_time = parse_wall_clock("end_time", &self.end_time)?;
        if start_time >= end_time {
            return Err(AppError::Validation(
                "start_time must be before end_time".to_string(),
            ));
        }
        Ok(CreateWorkShift {
            day_of_week: self.day_of_week,
            start_time,
            end_time,
        })
    }
}

// ============================================================================
// Appointments
// ============================================================================

async fn list_appointments(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
    Query(query): Query<DateQuery>,
) -> AppResult<Json<Vec<AppointmentDetails>>> {
    let list = BookingService::new(&state)?.list_for_date(query.date).await?;
    Ok(Json(list))
}

/// Confirm or reject a pending appointment. Confirming also synchronizes it.
async fn apply_action(
    State(state): State<Arc<AppState>>,
    OperatorAuth(operator): OperatorAuth,
    Path(id): Path<String>,
    Json(action): Json<BookingAction>,
) -> Result<Json<ActionOutcome>, AppErrorWithDetails> {
    tracing::info!("Operator {} applies {:?} to appointment {}", operator.sub, action, id);
    let outcome = BookingService::new(&state)?.apply_action(&id, action).await?;
    Ok(Json(outcome))
}

/// Retry the calendar synchronization of a confirmed appointment.
async fn sync_appointment(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
    Path(id): Path<String>,
) -> AppResult<Json<SyncOutcome>> {
    let outcome = BookingSynchronizer::new(&state).synchronize(&id).await?;
    Ok(Json(outcome))
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<NotificationTask>>> {
    let tasks = NotificationQueueRepository::list_for_appointment(&state.db, &id).await?;
    Ok(Json(tasks))
}

// ============================================================================
// Working shifts
// ============================================================================

async fn list_shifts(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
) -> AppResult<Json<Vec<WorkShift>>> {
    Ok(Json(WorkShiftRepository::list_all(&state.db).await?))
}

async fn create_shift(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
    Json(request): Json<ShiftRequest>,
) -> AppResult<(StatusCode, Json<WorkShift>)> {
    let shift = WorkShiftRepository::create(&state.db, request.validate()?).await?;
    Ok((StatusCode::CREATED, Json(shift)))
}

async fn delete_shift(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    if WorkShiftRepository::delete(&state.db, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Shift {}", id)))
    }
}

// ============================================================================
// Service catalog
// ============================================================================

async fn list_services(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
) -> AppResult<Json<Vec<Service>>> {
    Ok(Json(ServiceRepository::list_all(&state.db).await?))
}

async fn create_service(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
    Json(request): Json<ServiceRequest>,
) -> AppResult<(StatusCode, Json<Service>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    if request.duration_min <= 0 {
        return Err(AppError::Validation(
            "duration_min must be positive".to_string(),
        ));
    }
    if request.price < 0 {
        return Err(AppError::Validation("price cannot be negative".to_string()));
    }

    let service = ServiceRepository::create(
        &state.db,
        name,
        request.description.as_deref().filter(|d| !d.trim().is_empty()),
        request.price,
        request.duration_min,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(service)))
}

async fn set_service_active(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
    Path(id): Path<String>,
    Json(request): Json<ActiveRequest>,
) -> AppResult<Json<Service>> {
    ServiceRepository::set_active(&state.db, &id, request.is_active)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Service {}", id)))
}

async fn delete_service(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    if ServiceRepository::delete(&state.db, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Service {}", id)))
    }
}

// ============================================================================
// Patients and statistics
// ============================================================================

async fn patient_history(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
    Path(id): Path<String>,
) -> AppResult<Json<PatientHistory>> {
    Ok(Json(BookingService::new(&state)?.patient_history(&id).await?))
}

/// Totals over confirmed appointments.
async fn practice_stats(
    State(state): State<Arc<AppState>>,
    OperatorAuth(_operator): OperatorAuth,
) -> AppResult<Json<PracticeStats>> {
    Ok(Json(StatsService::new(&state)?.practice_stats().await?))
}
