//! Public booking submission, operator actions and the calendar synchronization
//! that follows a confirmation.

use std::sync::Arc;

use chrono::{Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::models::{
    Appointment, AppointmentDetails, AppointmentStatus, CreateAppointment, Patient,
};
use crate::db::{AppointmentRepository, PatientRepository, ServiceRepository};
use crate::error::{AppError, AppErrorWithDetails, AppResult};
use crate::i18n;
use crate::services::availability::{
    hours_covered, local_day_bounds, provider_offset, AvailabilityResolver,
};
use crate::services::google_calendar::EventDraft;
use crate::services::notifications::{
    render_confirmation, ConfirmationEmail, NotificationOutcome, NotificationService,
};
use crate::AppState;

/// Operator decision on a pending appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BookingAction {
    Confirm,
    Reject,
}

impl BookingAction {
    fn target_status(self) -> AppointmentStatus {
        match self {
            BookingAction::Confirm => AppointmentStatus::Confirmed,
            BookingAction::Reject => AppointmentStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub service_id: String,
    /// Provider-local date.
    pub date: NaiveDate,
    /// Provider-local slot start, "HH:MM".
    pub time: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub appointment_id: String,
    pub external_event_id: String,
    /// True when the appointment already carried an external id and nothing was created.
    pub already_synced: bool,
    pub notification: Option<NotificationOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub appointment: Appointment,
    pub sync: Option<SyncOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientHistory {
    pub patient: Patient,
    /// Newest first.
    pub appointments: Vec<AppointmentDetails>,
}

fn lang(state: &AppState) -> Option<&str> {
    Some(state.config.email.language.as_str())
}

/// Pushes a confirmed appointment to the external calendar and queues the
/// confirmation email.
pub struct BookingSynchronizer {
    pool: SqlitePool,
    state: Arc<AppState>,
}

impl BookingSynchronizer {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            pool: state.db.clone(),
            state: state.clone(),
        }
    }

    pub async fn synchronize(&self, appointment_id: &str) -> AppResult<SyncOutcome> {
        let details = AppointmentRepository::find_details(&self.pool, appointment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Appointment {}", appointment_id)))?;

        let lang = lang(&self.state);
        let (Some(start), Some(end)) = (details.start_time, details.end_time) else {
            return Err(AppError::IncompleteData(i18n::tr(
                lang,
                "sync.missing_start",
                None,
            )));
        };
        let Some(patient_name) = details.patient_full_name.as_deref() else {
            return Err(AppError::IncompleteData(i18n::tr(
                lang,
                "sync.missing_patient",
                None,
            )));
        };

        if details.status() != Some(AppointmentStatus::Confirmed) {
            return Err(AppError::Conflict(i18n::tr(
                lang,
                "sync.not_confirmed",
                Some(&[("status", details.status.as_str())]),
            )));
        }

        if let Some(existing) = details.external_event_id.clone() {
            tracing::info!(
                "Appointment {} already synchronized as {}",
                appointment_id,
                existing
            );
            return Ok(SyncOutcome {
                appointment_id: appointment_id.to_string(),
                external_event_id: existing,
                already_synced: true,
                notification: None,
            });
        }

        let calendar_id = self
            .state
            .config
            .google
            .calendar_id
            .as_deref()
            .ok_or_else(|| AppError::Configuration("GOOGLE_CALENDAR_ID is not set".to_string()))?;
        let offset = provider_offset(&self.state)?;

        let draft = self.event_draft(&details, patient_name, start, end, offset);
        let event_id = self.state.calendar.create_event(calendar_id, &draft).await?;

        if !AppointmentRepository::set_external_event_id(&self.pool, appointment_id, &event_id)
            .await?
        {
            // Another synchronization stored its id first; keep that one.
            let stored = AppointmentRepository::find_details(&self.pool, appointment_id)
                .await?
                .and_then(|d| d.external_event_id)
                .unwrap_or_else(|| event_id.clone());
            tracing::warn!(
                "Appointment {} was synchronized concurrently; keeping {} (created {})",
                appointment_id,
                stored,
                event_id
            );
            return Ok(SyncOutcome {
                appointment_id: appointment_id.to_string(),
                external_event_id: stored,
                already_synced: true,
                notification: None,
            });
        }

        tracing::info!(
            "Appointment {} synchronized to calendar event {}",
            appointment_id,
            event_id
        );

        let notification = self.notify(&details, patient_name, start, offset).await;

        Ok(SyncOutcome {
            appointment_id: appointment_id.to_string(),
            external_event_id: event_id,
            already_synced: false,
            notification: Some(notification),
        })
    }

    fn event_draft(
        &self,
        details: &AppointmentDetails,
        patient_name: &str,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
        offset: FixedOffset,
    ) -> EventDraft {
        let config = &self.state.config;
        let lang = lang(&self.state);
        let default_service = i18n::tr(lang, "calendar.event.default_service", None);
        let service = details.service_name.as_deref().unwrap_or(&default_service);

        let description = i18n::tr(
            lang,
            "calendar.event.description",
            Some(&[
                ("name", patient_name),
                ("phone", details.patient_phone.as_deref().unwrap_or("-")),
                ("email", details.patient_email.as_deref().unwrap_or("-")),
                ("provider", config.provider.display_name.as_str()),
            ]),
        );

        EventDraft {
            summary: format!(
                "{}: {} - {}",
                config.provider.event_prefix, service, patient_name
            ),
            description,
            start: start.with_timezone(&offset),
            end: end.with_timezone(&offset),
            time_zone: config.provider.timezone.clone(),
        }
    }

    /// Best effort: the outcome is reported, never raised.
    async fn notify(
        &self,
        details: &AppointmentDetails,
        patient_name: &str,
        start: chrono::DateTime<Utc>,
        offset: FixedOffset,
    ) -> NotificationOutcome {
        let Some(email) = details.patient_email.as_deref() else {
            return NotificationOutcome::Skipped {
                reason: "patient has no email address".to_string(),
            };
        };

        let config = &self.state.config;
        let message = render_confirmation(
            &ConfirmationEmail {
                patient_name,
                patient_email: email,
                service_name: details.service_name.as_deref(),
                start,
            },
            offset,
            &config.email.language,
            &config.provider.display_name,
        );

        match NotificationService::new(&self.state)
            .dispatch(Some(&details.id), message)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    "Failed to queue confirmation email for appointment {}: {}",
                    details.id,
                    e
                );
                NotificationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

pub struct BookingService {
    pool: SqlitePool,
    state: Arc<AppState>,
    offset: FixedOffset,
}

impl BookingService {
    pub fn new(state: &Arc<AppState>) -> AppResult<Self> {
        Ok(Self {
            pool: state.db.clone(),
            state: state.clone(),
            offset: provider_offset(state)?,
        })
    }

    /// Create a pending appointment for an available slot.
    pub async fn submit(&self, request: BookingRequest) -> AppResult<Appointment> {
        let lang = lang(&self.state);

        let full_name = request.full_name.trim();
        if full_name.is_empty() {
            return Err(AppError::Validation("full_name is required".to_string()));
        }
        let email = request.email.trim();
        if !email.contains('@') {
            return Err(AppError::Validation("email is invalid".to_string()));
        }

        let service = ServiceRepository::find_by_id(&self.pool, &request.service_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Service {}", request.service_id)))?;
        if !service.is_active {
            return Err(AppError::Validation(i18n::tr(
                lang,
                "booking.service_inactive",
                None,
            )));
        }

        let time = NaiveTime::parse_from_str(request.time.trim(), "%H:%M")
            .map_err(|_| AppError::BadRequest(format!("Invalid time: {}", request.time)))?;
        local_day_bounds(request.date, self.offset)?;
        let local_start = request.date.and_time(time);
        let start = self
            .offset
            .from_local_datetime(&local_start)
            .single()
            .ok_or_else(|| AppError::BadRequest("Ambiguous local time".to_string()))?
            .with_timezone(&Utc);
        if start <= Utc::now() {
            return Err(AppError::Validation(
                "Cannot book a slot in the past".to_string(),
            ));
        }
        let end = Duration::try_minutes(service.duration_min)
            .and_then(|d| start.checked_add_signed(d))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Invalid service duration: {} minutes",
                    service.duration_min
                ))
            })?;

        // The start must be a slot, and every hour the service runs into must
        // be a free slot too.
        let slot_time = time.format("%H:%M").to_string();
        let covered = hours_covered(
            request.date,
            local_start,
            Some(end.with_timezone(&self.offset).naive_local()),
        );
        let slots = AvailabilityResolver::new(&self.state)?
            .resolve(request.date)
            .await?;
        let is_free = |hour: u32| {
            let time = format!("{:02}:00", hour);
            slots.iter().any(|s| s.time == time && s.available)
        };
        if !slots.iter().any(|s| s.time == slot_time) || !covered.into_iter().all(is_free) {
            let date = request.date.to_string();
            return Err(AppError::Conflict(i18n::tr(
                lang,
                "booking.slot_unavailable",
                Some(&[("time", slot_time.as_str()), ("date", date.as_str())]),
            )));
        }

        let patient = PatientRepository::get_or_create(
            &self.pool,
            full_name,
            email,
            request.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()),
        )
        .await?;

        let appointment = AppointmentRepository::create(
            &self.pool,
            CreateAppointment {
                patient_id: patient.id,
                service_id: service.id,
                start_time: start,
                end_time: end,
            },
        )
        .await?;

        tracing::info!(
            "Booked pending appointment {} at {} for {}",
            appointment.id,
            appointment.start_time,
            email
        );
        Ok(appointment)
    }

    /// Apply an operator decision to a pending appointment.
    ///
    /// A confirmation is stored before synchronization runs; if the sync then
    /// fails the error carries `appointment_status: "confirmed"` so the caller
    /// knows to retry the sync alone.
    pub async fn apply_action(
        &self,
        appointment_id: &str,
        action: BookingAction,
    ) -> Result<ActionOutcome, AppErrorWithDetails> {
        let target = action.target_status();
        let Some(appointment) =
            AppointmentRepository::transition_from_pending(&self.pool, appointment_id, target)
                .await?
        else {
            let current = AppointmentRepository::find_by_id(&self.pool, appointment_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Appointment {}", appointment_id)))?;
            return Err(AppError::Conflict(i18n::tr(
                lang(&self.state),
                "booking.not_pending",
                Some(&[("status", current.status.as_str())]),
            ))
            .into());
        };

        tracing::info!("Appointment {} is now {}", appointment.id, target.as_str());

        if action == BookingAction::Reject {
            return Ok(ActionOutcome {
                appointment,
                sync: None,
            });
        }

        match BookingSynchronizer::new(&self.state)
            .synchronize(appointment_id)
            .await
        {
            Ok(sync) => {
                let appointment = AppointmentRepository::find_by_id(&self.pool, appointment_id)
                    .await?
                    .unwrap_or(appointment);
                Ok(ActionOutcome {
                    appointment,
                    sync: Some(sync),
                })
            }
            Err(e) => {
                tracing::error!(
                    "Appointment {} confirmed but calendar sync failed: {}",
                    appointment_id,
                    e
                );
                Err(e.with_details(serde_json::json!({
                    "appointment_id": appointment_id,
                    "appointment_status": AppointmentStatus::Confirmed.as_str(),
                })))
            }
        }
    }

    /// Appointments starting on a provider-local date.
    pub async fn list_for_date(&self, date: NaiveDate) -> AppResult<Vec<AppointmentDetails>> {
        let (from, to) = local_day_bounds(date, self.offset)?;
        AppointmentRepository::list_details_between(&self.pool, from, to).await
    }

    pub async fn patient_history(&self, patient_id: &str) -> AppResult<PatientHistory> {
        let patient = PatientRepository::find_by_id(&self.pool, patient_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Patient {}", patient_id)))?;
        let appointments =
            AppointmentRepository::list_details_for_patient(&self.pool, patient_id).await?;
        Ok(PatientHistory {
            patient,
            appointments,
        })
    }
}
