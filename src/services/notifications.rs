use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::{EmailConfig, NotificationRetryConfig};
use crate::db::models::{CreateNotificationTask, NotificationTask};
use crate::db::NotificationQueueRepository;
use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Result of handing an email to the notification pipeline.
///
/// Never turned into an error for the caller: a booking stays valid whether
/// or not its email went out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Sent {
        task_id: String,
    },
    /// First delivery failed; the background worker will retry.
    Retrying {
        task_id: String,
        next_attempt_at: NaiveDateTime,
        error: String,
    },
    /// Gave up; the task stays in the dead-letter state for inspection.
    Dead {
        task_id: String,
        error: String,
    },
    Skipped {
        reason: String,
    },
    /// The task could not even be queued.
    Failed {
        error: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// False when the channel is not configured; emails are then skipped.
    fn is_enabled(&self) -> bool;

    async fn send_email(&self, message: &EmailMessage) -> AppResult<()>;
}

/// Sends email through the Resend HTTP API.
pub struct ResendNotifier {
    client: Client,
    api_key: Option<String>,
    api_url: String,
    from: String,
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

impl ResendNotifier {
    pub fn new(client: Client, config: &EmailConfig) -> Self {
        Self {
            client,
            api_key: config.resend_api_key.clone(),
            api_url: config.api_url.clone(),
            from: config.from_address.clone(),
        }
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn send_email(&self, message: &EmailMessage) -> AppResult<()> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Configuration("RESEND_API_KEY is not set".to_string()))?;

        // Single attempt: retries go through the persistent queue.
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&ResendRequest {
                from: &self.from,
                to: [message.to.as_str()],
                subject: &message.subject,
                html: &message.html,
            })
            .send()
            .await
            .map_err(|e| AppError::Notification(format!("Failed to send email: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "Resend API error ({}): {}",
                status.as_u16(),
                error_text
            )));
        }

        tracing::info!("Sent email to {}", message.to);
        Ok(())
    }
}

/// Decide whether a failed delivery is worth retrying.
///
/// Network problems, rate limiting and 5xx responses are transient; other
/// API rejections (bad address, invalid key) will not improve with time.
fn is_retryable_error(err: &AppError) -> bool {
    let e = match err {
        AppError::Notification(msg) => msg.to_lowercase(),
        _ => return false,
    };

    if e.contains("too many requests")
        || e.contains("timeout")
        || e.contains("timed out")
        || e.contains("connection reset")
        || e.contains("failed to send")
    {
        return true;
    }

    // "Resend API error (502): ..."
    if let Some(open) = e.find("api error (") {
        let rest = &e[open + "api error (".len()..];
        if let Some(close) = rest.find(')') {
            if let Ok(code) = rest[..close].parse::<u16>() {
                return code == 429 || code >= 500;
            }
        }
    }

    false
}

/// Delay before the retry following `attempts` failed attempts.
fn backoff_for(cfg: &NotificationRetryConfig, attempts: i32) -> Duration {
    let exp = attempts.clamp(0, 20) as u32;
    let secs = cfg
        .initial_backoff_seconds
        .saturating_mul(1u64 << exp)
        .min(cfg.max_backoff_seconds);
    Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX))
        .unwrap_or_else(|| Duration::days(365))
}

/// Escapes text for use inside HTML element content or attribute values.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// What the confirmation email needs to know about an appointment.
#[derive(Debug, Clone)]
pub struct ConfirmationEmail<'a> {
    pub patient_name: &'a str,
    pub patient_email: &'a str,
    pub service_name: Option<&'a str>,
    pub start: DateTime<Utc>,
}

pub fn render_confirmation(
    email: &ConfirmationEmail<'_>,
    offset: FixedOffset,
    lang: &str,
    provider: &str,
) -> EmailMessage {
    let lang = Some(lang);
    let local = email.start.with_timezone(&offset);
    let date = i18n::format_long_date(lang, local.date_naive());
    let time = i18n::format_time_12h(lang, local.time());
    let default_service = i18n::tr(lang, "calendar.event.default_service", None);
    let service = escape_html(email.service_name.unwrap_or(&default_service));
    let patient_name = escape_html(email.patient_name);
    let provider_html = escape_html(provider);

    let html = format!(
        r#"<div style="font-family: sans-serif; color: #333; padding: 20px; max-width: 600px; margin: 0 auto; border: 1px solid #eee; border-radius: 10px;">
  <h2 style="color: #4f46e5; text-align: center;">{heading}</h2>
  <p>{greeting}</p>
  <p>{intro}</p>
  <div style="background-color: #f3f4f6; padding: 20px; border-radius: 8px; margin: 20px 0;">
    <p style="margin: 8px 0; font-size: 16px;"><strong>{date_label}</strong> {date}</p>
    <p style="margin: 8px 0; font-size: 16px;"><strong>{time_label}</strong> {time}</p>
    <p style="margin: 8px 0; font-size: 16px;"><strong>{service_label}</strong> {service}</p>
  </div>
  <p style="font-size: 14px; color: #666;">{closing}</p>
  <hr style="border: 0; border-top: 1px solid #eee; margin: 20px 0;" />
  <p style="text-align: center; font-size: 12px; color: #999;">{footer}</p>
</div>"#,
        heading = i18n::tr(lang, "email.confirmation.heading", None),
        greeting = i18n::tr(
            lang,
            "email.confirmation.greeting",
            Some(&[("name", patient_name.as_str())])
        ),
        intro = i18n::tr(lang, "email.confirmation.intro", None),
        date_label = i18n::tr(lang, "email.confirmation.date_label", None),
        time_label = i18n::tr(lang, "email.confirmation.time_label", None),
        service_label = i18n::tr(lang, "email.confirmation.service_label", None),
        closing = i18n::tr(lang, "email.confirmation.closing", None),
        footer = i18n::tr(
            lang,
            "email.confirmation.footer",
            Some(&[("provider", provider_html.as_str())])
        ),
    );

    EmailMessage {
        to: email.patient_email.to_string(),
        subject: i18n::tr(
            lang,
            "email.confirmation.subject",
            Some(&[("provider", provider)]),
        ),
        html,
    }
}

/// Queues emails and delivers them, inline first and then from the retry worker.
pub struct NotificationService {
    pool: SqlitePool,
    state: Arc<AppState>,
}

impl NotificationService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            pool: state.db.clone(),
            state: state.clone(),
        }
    }

    /// Persist the email as a task and try to deliver it right away.
    ///
    /// Delivery failures are recorded on the task and reported in the outcome;
    /// only a failure to persist the task is returned as an error.
    pub async fn dispatch(
        &self,
        appointment_id: Option<&str>,
        message: EmailMessage,
    ) -> AppResult<NotificationOutcome> {
        if !self.state.notifier.is_enabled() {
            tracing::info!("Email channel not configured; skipping email to {}", message.to);
            return Ok(NotificationOutcome::Skipped {
                reason: "email channel not configured".to_string(),
            });
        }
        if message.to.trim().is_empty() {
            return Ok(NotificationOutcome::Skipped {
                reason: "recipient has no email address".to_string(),
            });
        }

        let cfg = &self.state.config.notification_retry;
        let now = Utc::now().naive_utc();
        let ttl = Duration::try_seconds(i64::try_from(cfg.ttl_seconds).unwrap_or(i64::MAX));
        let task = NotificationQueueRepository::create(
            &self.pool,
            CreateNotificationTask {
                appointment_id: appointment_id.map(str::to_string),
                recipient: message.to.clone(),
                subject: message.subject.clone(),
                body: message.html.clone(),
                max_attempts: Some(cfg.max_attempts as i32),
                next_attempt_at: Some(now),
                expires_at: ttl.and_then(|ttl| now.checked_add_signed(ttl)),
                // Claimed by this call, so the worker leaves it alone.
                status: Some("processing".to_string()),
            },
        )
        .await?;

        self.deliver(task).await
    }

    /// Retry a task claimed by the background worker.
    pub async fn process_queued_task(&self, task: NotificationTask) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        if let Some(exp) = task.expires_at {
            if exp <= now {
                tracing::info!(
                    "Notification task {} expired (expires_at={} now={}), moving to DLQ",
                    task.id,
                    exp,
                    now
                );
                NotificationQueueRepository::mark_dead(
                    &self.pool,
                    &task.id,
                    Some("expired".to_string()),
                )
                .await?;
                return Ok(());
            }
        }

        let outcome = self.deliver(task).await?;
        tracing::debug!("Queued notification processed: {:?}", outcome);
        Ok(())
    }

    async fn deliver(&self, task: NotificationTask) -> AppResult<NotificationOutcome> {
        let message = EmailMessage {
            to: task.recipient.clone(),
            subject: task.subject.clone(),
            html: task.body.clone(),
        };

        match self.state.notifier.send_email(&message).await {
            Ok(()) => {
                NotificationQueueRepository::mark_succeeded(&self.pool, &task.id).await?;
                Ok(NotificationOutcome::Sent { task_id: task.id })
            }
            Err(e) => self.handle_failure(&task, e).await,
        }
    }

    async fn handle_failure(
        &self,
        task: &NotificationTask,
        err: AppError,
    ) -> AppResult<NotificationOutcome> {
        let error = err.to_string();

        if !is_retryable_error(&err) {
            tracing::warn!(
                "Notification task {} failed permanently: {}; moving to DLQ",
                task.id,
                error
            );
            NotificationQueueRepository::mark_dead(&self.pool, &task.id, Some(error.clone()))
                .await?;
            return Ok(NotificationOutcome::Dead {
                task_id: task.id.clone(),
                error,
            });
        }

        let cfg = &self.state.config.notification_retry;
        let now = Utc::now().naive_utc();
        let next = now
            .checked_add_signed(backoff_for(cfg, task.attempts))
            .unwrap_or(NaiveDateTime::MAX);
        let updated = NotificationQueueRepository::register_attempt_and_schedule(
            &self.pool,
            &task.id,
            next,
            Some(error.clone()),
        )
        .await?;

        if updated.status == "dead" {
            tracing::warn!(
                "Notification task {} reached max attempts ({}); moving to DLQ",
                task.id,
                updated.max_attempts
            );
            return Ok(NotificationOutcome::Dead {
                task_id: updated.id,
                error,
            });
        }

        tracing::info!(
            "Notification task {} failed (attempt {}/{}): {}; next attempt at {}",
            task.id,
            updated.attempts,
            updated.max_attempts,
            error,
            next
        );
        Ok(NotificationOutcome::Retrying {
            task_id: updated.id,
            next_attempt_at: updated.next_attempt_at,
            error,
        })
    }
}
