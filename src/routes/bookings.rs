use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use crate::db::models::Appointment;
use crate::error::AppResult;
use crate::services::booking::{BookingRequest, BookingService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/bookings", post(create_booking))
}

/// Request an appointment. It stays pending until an operator confirms it.
async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BookingRequest>,
) -> AppResult<(StatusCode, Json<Appointment>)> {
    let appointment = BookingService::new(&state)?.submit(request).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::CreateWorkShift;
    use crate::db::{test_pool, ServiceRepository, WorkShiftRepository};
    use crate::test_support::{test_state, FakeCalendar, FakeNotifier};
    use axum::body::Body;
    use chrono::{Duration, NaiveTime, Utc};
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn post_json(body: serde_json::Value) -> Request<Body> {
        Request::post("/bookings")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn books_then_rejects_the_same_slot() {
        let pool = test_pool().await;
        for day in 0..7 {
            WorkShiftRepository::create(
                &pool,
                CreateWorkShift {
                    day_of_week: day,
                    start_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
                },
            )
            .await
            .unwrap();
        }
        let service = ServiceRepository::create(&pool, "Terapia individual", None, 100_000, 60)
            .await
            .unwrap();
        let state = test_state(
            pool,
            Arc::new(FakeCalendar::default()),
            Arc::new(FakeNotifier::default()),
        );
        let app = router().with_state(state);

        let date = (Utc::now().date_naive() + Duration::days(3)).to_string();
        let body = serde_json::json!({
            "service_id": service.id,
            "date": date,
            "time": "15:00",
            "full_name": "Carlos Ruiz",
            "email": "carlos@example.com",
            "phone": null
        });

        let response = app.clone().oneshot(post_json(body.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let appt: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(appt["status"], "pending");

        let response = app.oneshot(post_json(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invalid_email_is_unprocessable() {
        let pool = test_pool().await;
        let state = test_state(
            pool,
            Arc::new(FakeCalendar::default()),
            Arc::new(FakeNotifier::default()),
        );

        let response = router()
            .with_state(state)
            .oneshot(post_json(serde_json::json!({
                "service_id": "x",
                "date": "2030-01-07",
                "time": "09:00",
                "full_name": "Carlos Ruiz",
                "email": "not-an-email"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
