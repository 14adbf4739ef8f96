//! Google Calendar v3 client: listing events in a window and inserting events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::services::google_auth::{TokenSource, SCOPE_CALENDAR, SCOPE_CALENDAR_READONLY};
use crate::services::http::{send_with_backoff, RetryPolicy};

/// Guard against a misbehaving upstream that never stops paginating.
const MAX_PAGES: usize = 20;
const PAGE_SIZE: &str = "250";

/// Start or end of an external event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    /// A timed boundary, in the offset the calendar reported.
    Timed(DateTime<FixedOffset>),
    /// An all-day boundary. All-day end dates are exclusive.
    AllDay(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEvent {
    pub id: String,
    pub summary: Option<String>,
    pub start: EventTime,
    pub end: Option<EventTime>,
}

/// An event to create on the external calendar.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub summary: String,
    pub description: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// IANA timezone id the calendar should display the event in.
    pub time_zone: String,
}

#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// Single event instances intersecting `[from, to)`.
    async fn list_events(
        &self,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<ExternalEvent>>;

    /// Create an event and return its id. Never retried.
    async fn create_event(&self, calendar_id: &str, draft: &EventDraft) -> AppResult<String>;
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<RawEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    summary: Option<String>,
    start: Option<RawEventTime>,
    end: Option<RawEventTime>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct RawEventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

#[derive(Debug, Serialize)]
struct InsertEventRequest<'a> {
    summary: &'a str,
    description: &'a str,
    start: RawEventTime,
    end: RawEventTime,
}

#[derive(Debug, Deserialize)]
struct InsertEventResponse {
    id: String,
}

impl RawEventTime {
    fn parse(&self) -> Result<EventTime, String> {
        if let Some(ref dt) = self.date_time {
            return DateTime::parse_from_rfc3339(dt)
                .map(EventTime::Timed)
                .map_err(|e| format!("invalid dateTime '{}': {}", dt, e));
        }
        if let Some(ref d) = self.date {
            return NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map(EventTime::AllDay)
                .map_err(|e| format!("invalid date '{}': {}", d, e));
        }
        Err("event time has neither dateTime nor date".to_string())
    }

    fn timed(at: DateTime<FixedOffset>, time_zone: &str) -> Self {
        Self {
            date_time: Some(at.to_rfc3339_opts(SecondsFormat::Secs, false)),
            date: None,
            time_zone: Some(time_zone.to_string()),
        }
    }
}

impl RawEvent {
    fn into_event(self) -> Result<ExternalEvent, String> {
        let start = self
            .start
            .as_ref()
            .ok_or_else(|| format!("event {} has no start", self.id))?
            .parse()?;
        let end = self.end.as_ref().map(RawEventTime::parse).transpose()?;

        Ok(ExternalEvent {
            id: self.id,
            summary: self.summary,
            start,
            end,
        })
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct GoogleCalendarClient {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    retry: RetryPolicy,
}

impl GoogleCalendarClient {
    pub fn new(
        client: Client,
        base_url: &str,
        tokens: Arc<dyn TokenSource>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            retry,
        }
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }

    async fn fetch_page(&self, url: &str, query: &[(&str, String)]) -> AppResult<EventsPage> {
        // One forced refresh if the cached token is refused.
        let mut refreshed_token = false;
        loop {
            let token = self.tokens.access_token(SCOPE_CALENDAR_READONLY).await?;

            let response = send_with_backoff(self.retry, || {
                self.client.get(url).bearer_auth(&token).query(query)
            })
            .await
            .map_err(|e| AppError::UpstreamQuery(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed_token {
                tracing::warn!("Calendar rejected the access token. Refreshing and retrying.");
                self.tokens.invalidate(SCOPE_CALENDAR_READONLY).await;
                refreshed_token = true;
                continue;
            }

            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(AppError::UpstreamQuery(format!(
                    "events.list returned {}: {}",
                    status, error_text
                )));
            }

            return response.json::<EventsPage>().await.map_err(|e| {
                AppError::UpstreamQuery(format!("Failed to parse events.list response: {}", e))
            });
        }
    }
}

#[async_trait]
impl CalendarApi for GoogleCalendarClient {
    async fn list_events(
        &self,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<ExternalEvent>> {
        let url = self.events_url(calendar_id);
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("timeMin", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("timeMax", to.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ];
            if let Some(ref t) = page_token {
                query.push(("pageToken", t.clone()));
            }

            let page = self.fetch_page(&url, &query).await?;
            for raw in page.items {
                events.push(raw.into_event().map_err(AppError::UpstreamQuery)?);
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => {
                    tracing::debug!(
                        "Fetched {} external events between {} and {}",
                        events.len(),
                        from,
                        to
                    );
                    return Ok(events);
                }
            }
        }

        Err(AppError::UpstreamQuery(format!(
            "events.list did not finish within {} pages",
            MAX_PAGES
        )))
    }

    async fn create_event(&self, calendar_id: &str, draft: &EventDraft) -> AppResult<String> {
        let token = self.tokens.access_token(SCOPE_CALENDAR).await?;

        let body = InsertEventRequest {
            summary: &draft.summary,
            description: &draft.description,
            start: RawEventTime::timed(draft.start, &draft.time_zone),
            end: RawEventTime::timed(draft.end, &draft.time_zone),
        };

        // Inserts are not idempotent upstream, so a single attempt only.
        let response = self
            .client
            .post(self.events_url(calendar_id))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::UpstreamWrite(format!("events.insert failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED {
                self.tokens.invalidate(SCOPE_CALENDAR).await;
            }
            return Err(AppError::UpstreamWrite(format!(
                "events.insert returned {}: {}",
                status, error_text
            )));
        }

        let created: InsertEventResponse = response.json().await.map_err(|e| {
            AppError::UpstreamWrite(format!("Failed to parse events.insert response: {}", e))
        })?;

        tracing::info!("Created calendar event {}", created.id);
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::http::fast_retry;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct StaticTokens {
        issued: AtomicUsize,
        invalidated: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for StaticTokens {
        async fn access_token(&self, _scope: &str) -> AppResult<String> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{}", n))
        }

        async fn invalidate(&self, _scope: &str) {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingTokens;

    #[async_trait]
    impl TokenSource for FailingTokens {
        async fn access_token(&self, _scope: &str) -> AppResult<String> {
            Err(AppError::AuthExchange("invalid_grant".into()))
        }

        async fn invalidate(&self, _scope: &str) {}
    }

    fn client_for(server: &MockServer, tokens: Arc<dyn TokenSource>) -> GoogleCalendarClient {
        GoogleCalendarClient::new(Client::new(), &server.uri(), tokens, fast_retry(2))
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 3, 5, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn lists_timed_and_all_day_events_across_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/agenda%40example.com/events"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("orderBy", "startTime"))
            .and(query_param("timeMin", "2026-03-02T05:00:00Z"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    { "id": "b", "start": { "date": "2026-03-02" }, "end": { "date": "2026-03-03" } }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendars/agenda%40example.com/events"))
            .and(header("authorization", "Bearer token-0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {
                        "id": "a",
                        "summary": "Supervisión",
                        "start": { "dateTime": "2026-03-02T10:00:00-05:00" },
                        "end": { "dateTime": "2026-03-02T11:00:00-05:00" }
                    }
                ],
                "nextPageToken": "p2"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokens::default()));
        let (from, to) = window();
        let events = client
            .list_events("agenda@example.com", from, to)
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(
            events[0].start,
            EventTime::Timed(offset.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap())
        );
        assert_eq!(events[0].summary.as_deref(), Some("Supervisión"));
        assert_eq!(
            events[1].start,
            EventTime::AllDay(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
        );
    }

    #[tokio::test]
    async fn list_failure_is_an_upstream_query_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokens::default()));
        let (from, to) = window();
        let err = client.list_events("primary", from, to).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamQuery(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error_not_an_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [ { "id": "x", "start": { "dateTime": "yesterday" } } ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokens::default()));
        let (from, to) = window();
        let err = client.list_events("primary", from, to).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamQuery(ref m) if m.contains("yesterday")));
    }

    #[tokio::test]
    async fn unauthorized_list_refreshes_token_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer token-0"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "items": [] })),
            )
            .mount(&server)
            .await;

        let tokens = Arc::new(StaticTokens::default());
        let client = client_for(&server, tokens.clone());
        let (from, to) = window();
        let events = client.list_events("primary", from, to).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(tokens.invalidated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn token_failure_propagates_without_calling_calendar() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(FailingTokens));
        let (from, to) = window();
        let err = client.list_events("primary", from, to).await.unwrap_err();
        assert!(matches!(err, AppError::AuthExchange(_)));
    }

    fn draft() -> EventDraft {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        EventDraft {
            summary: "PSI: Terapia - Ana".to_string(),
            description: "Paciente: Ana".to_string(),
            start: offset.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            end: offset.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
            time_zone: "America/Bogota".to_string(),
        }
    }

    #[tokio::test]
    async fn create_event_posts_draft_and_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(body_partial_json(serde_json::json!({
                "summary": "PSI: Terapia - Ana",
                "start": { "dateTime": "2026-03-02T09:00:00-05:00", "timeZone": "America/Bogota" },
                "end": { "dateTime": "2026-03-02T10:00:00-05:00", "timeZone": "America/Bogota" }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "evt-123" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokens::default()));
        let id = client.create_event("primary", &draft()).await.unwrap();
        assert_eq!(id, "evt-123");
    }

    #[tokio::test]
    async fn create_event_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(StaticTokens::default()));
        let err = client.create_event("primary", &draft()).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamWrite(_)));
    }
}
