use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub database: String,
    pub calendar_configured: bool,
    pub email_enabled: bool,
}

/// Liveness plus a cheap database round trip. The external calendar is not
/// called here.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let google = &state.config.google;

    let response = HealthResponse {
        status: if db_ok { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        database: if db_ok { "ok" } else { "unavailable" }.to_string(),
        calendar_configured: google.calendar_id.is_some()
            && google.client_email.is_some()
            && google.private_key.is_some(),
        email_enabled: state.notifier.is_enabled(),
    };

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::test_support::{test_state, FakeCalendar, FakeNotifier};
    use axum::{body::Body, routing::get, Router};
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn reports_database_and_channels() {
        let state = test_state(
            test_pool().await,
            Arc::new(FakeCalendar::default()),
            Arc::new(FakeNotifier::disabled()),
        );
        let app = Router::new()
            .route("/health", get(health_check))
            .with_state(state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "ok");
        assert_eq!(body["calendar_configured"], false);
        assert_eq!(body["email_enabled"], false);
    }
}
