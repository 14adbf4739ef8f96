use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Missing or unusable calendar / email secrets.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The token endpoint refused the signed assertion.
    #[error("Token exchange failed: {0}")]
    AuthExchange(String),

    /// Listing external calendar events failed; availability cannot be known.
    #[error("Calendar query failed: {0}")]
    UpstreamQuery(String),

    /// Creating the external calendar event failed.
    #[error("Calendar write failed: {0}")]
    UpstreamWrite(String),

    #[error("Incomplete appointment data: {0}")]
    IncompleteData(String),

    #[error("Notification failed: {0}")]
    Notification(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl AppError {
    /// Status, machine-readable code and client-facing message.
    /// Internal causes are logged here and never leaked to the client.
    fn status_and_code(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                self.to_string(),
            ),
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                msg.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Jwt(e) => {
                tracing::warn!("JWT error: {:?}", e);
                (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_TOKEN",
                    "Invalid or expired token".to_string(),
                )
            }
            AppError::Configuration(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "Server configuration error".to_string(),
                )
            }
            AppError::AuthExchange(msg) => {
                tracing::error!("Token exchange failed: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "AUTH_EXCHANGE_FAILED",
                    "Could not authenticate with the calendar provider".to_string(),
                )
            }
            AppError::UpstreamQuery(msg) => {
                tracing::error!("Calendar query failed: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "AVAILABILITY_UNKNOWN",
                    "Availability could not be determined, try again later".to_string(),
                )
            }
            AppError::UpstreamWrite(msg) => {
                tracing::error!("Calendar write failed: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "CALENDAR_SYNC_FAILED",
                    "The calendar event could not be created".to_string(),
                )
            }
            AppError::IncompleteData(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INCOMPLETE_DATA",
                msg.clone(),
            ),
            AppError::Notification(msg) => {
                tracing::warn!("Notification failed: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "NOTIFICATION_FAILED",
                    "The notification could not be delivered".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        }
    }

    pub fn with_details(self, details: serde_json::Value) -> AppErrorWithDetails {
        AppErrorWithDetails {
            error: self,
            details: Some(details),
        }
    }
}

fn error_response(
    status: StatusCode,
    code: &str,
    message: String,
    details: Option<serde_json::Value>,
) -> Response {
    let body = ErrorResponse {
        error: ErrorBody {
            code: code.to_string(),
            message,
            details,
        },
    };

    (status, Json(body)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.status_and_code();
        error_response(status, code, message, None)
    }
}

#[derive(Debug)]
pub struct AppErrorWithDetails {
    error: AppError,
    details: Option<serde_json::Value>,
}

impl AppErrorWithDetails {
    pub fn error(&self) -> &AppError {
        &self.error
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }
}

impl IntoResponse for AppErrorWithDetails {
    fn into_response(self) -> Response {
        let (status, code, message) = self.error.status_and_code();
        error_response(status, code, message, self.details)
    }
}

impl From<AppError> for AppErrorWithDetails {
    fn from(error: AppError) -> Self {
        AppErrorWithDetails {
            error,
            details: None,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
