use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::services::availability::{AvailabilityResolver, Slot};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/availability", get(get_availability))
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub date: NaiveDate,
    pub slots: Vec<Slot>,
}

/// Bookable slots for a provider-local date.
///
/// A closed day is `200` with no slots; an unreachable calendar is an error,
/// never an empty list.
async fn get_availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> AppResult<Json<AvailabilityResponse>> {
    let slots = AvailabilityResolver::new(&state)?.resolve(query.date).await?;
    Ok(Json(AvailabilityResponse {
        date: query.date,
        slots,
    }))
}
