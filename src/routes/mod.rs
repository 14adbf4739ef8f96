pub mod admin;
pub mod auth;
pub mod availability;
pub mod bookings;
pub mod health;
pub mod services;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// Unauthenticated endpoints used by the booking page.
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(availability::router())
        .merge(services::router())
        .merge(bookings::router())
}
