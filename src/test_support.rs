//! In-process fakes for the external calendar and the email channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::AppointmentRepository;
use crate::error::{AppError, AppResult};
use crate::services::google_calendar::{CalendarApi, EventDraft, ExternalEvent};
use crate::services::notifications::{EmailMessage, Notifier};
use crate::AppState;

pub const TEST_JWT_SECRET: &str = "test-secret-for-operator-tokens";

/// How a fake upstream call should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The token exchange is refused.
    Auth,
    /// The calendar itself answers with an error.
    Upstream,
}

impl Failure {
    fn list_error(self) -> AppError {
        match self {
            Failure::Auth => AppError::AuthExchange("invalid_grant".to_string()),
            Failure::Upstream => AppError::UpstreamQuery("status 503".to_string()),
        }
    }

    fn create_error(self) -> AppError {
        match self {
            Failure::Auth => AppError::AuthExchange("invalid_grant".to_string()),
            Failure::Upstream => AppError::UpstreamWrite("status 500".to_string()),
        }
    }
}

pub struct FakeCalendar {
    events: Vec<ExternalEvent>,
    list_failure: Mutex<Option<Failure>>,
    create_failure: Mutex<Option<Failure>>,
    next_id: Mutex<String>,
    /// Id another synchronization stores while `create_event` is in flight.
    concurrent_sync: Mutex<Option<(SqlitePool, String, String)>>,
    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub created: Mutex<Vec<EventDraft>>,
    pub last_window: Mutex<Option<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl Default for FakeCalendar {
    fn default() -> Self {
        Self::with_events(Vec::new())
    }
}

impl FakeCalendar {
    pub fn with_events(events: Vec<ExternalEvent>) -> Self {
        Self {
            events,
            list_failure: Mutex::new(None),
            create_failure: Mutex::new(None),
            next_id: Mutex::new("evt_123".to_string()),
            concurrent_sync: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
            last_window: Mutex::new(None),
        }
    }

    pub fn fail_list(&self, failure: Failure) {
        *self.list_failure.lock().unwrap() = Some(failure);
    }

    pub fn fail_create(&self, failure: Failure) {
        *self.create_failure.lock().unwrap() = Some(failure);
    }

    pub fn recover_create(&self) {
        *self.create_failure.lock().unwrap() = None;
    }

    pub fn set_next_id(&self, id: &str) {
        *self.next_id.lock().unwrap() = id.to_string();
    }

    /// Make the next create race with a sync that stores `event_id` on
    /// `appointment_id` first.
    pub fn store_concurrently(&self, pool: SqlitePool, appointment_id: &str, event_id: &str) {
        *self.concurrent_sync.lock().unwrap() =
            Some((pool, appointment_id.to_string(), event_id.to_string()));
    }

    pub fn created_drafts(&self) -> Vec<EventDraft> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalendarApi for FakeCalendar {
    async fn list_events(
        &self,
        _calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<ExternalEvent>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_window.lock().unwrap() = Some((from, to));
        if let Some(failure) = *self.list_failure.lock().unwrap() {
            return Err(failure.list_error());
        }
        Ok(self.events.clone())
    }

    async fn create_event(&self, _calendar_id: &str, draft: &EventDraft) -> AppResult<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = *self.create_failure.lock().unwrap() {
            return Err(failure.create_error());
        }
        self.created.lock().unwrap().push(draft.clone());
        let concurrent = self.concurrent_sync.lock().unwrap().take();
        if let Some((pool, appointment_id, event_id)) = concurrent {
            AppointmentRepository::set_external_event_id(&pool, &appointment_id, &event_id)
                .await?;
        }
        Ok(self.next_id.lock().unwrap().clone())
    }
}

pub struct FakeNotifier {
    enabled: bool,
    failure: Mutex<Option<String>>,
    sent: Mutex<Vec<EmailMessage>>,
}

impl Default for FakeNotifier {
    fn default() -> Self {
        Self {
            enabled: true,
            failure: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl FakeNotifier {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Make every following send fail with this message.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send_email(&self, message: &EmailMessage) -> AppResult<()> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(AppError::Notification(err));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.google.calendar_id = Some("primary".to_string());
    config.jwt.secret = TEST_JWT_SECRET.to_string();
    config.email.resend_api_key = Some("re_test".to_string());
    config.provider.display_name = "Consultorio Test".to_string();
    // Retries become due immediately.
    config.notification_retry.initial_backoff_seconds = 0;
    config
}

pub fn test_state(
    db: SqlitePool,
    calendar: Arc<FakeCalendar>,
    notifier: Arc<FakeNotifier>,
) -> Arc<AppState> {
    Arc::new(AppState {
        db,
        config: test_config(),
        calendar,
        notifier,
    })
}
