use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::db::models::Service;
use crate::db::ServiceRepository;
use crate::error::AppResult;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/services", get(list_services))
}

/// Services patients can book.
async fn list_services(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Service>>> {
    let services = ServiceRepository::list_active(&state.db).await?;
    Ok(Json(services))
}
