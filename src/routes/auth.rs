//! Operator authentication.
//!
//! Tokens are issued by the identity provider in front of this service; here
//! they are only verified (HS256, shared secret) and their role checked.

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::AppState;

const OPERATOR_ROLES: [&str; 2] = ["admin", "operator"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorClaims {
    pub sub: String,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

/// Decode and validate an operator JWT, returning the claims.
pub fn decode_operator_token(secret: &str, token: &str) -> Result<OperatorClaims, AppError> {
    if secret.is_empty() {
        return Err(AppError::Configuration("JWT_SECRET is not set".to_string()));
    }
    let token_data = decode::<OperatorClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Extractor for an authenticated operator (role `admin` or `operator`).
pub struct OperatorAuth(pub OperatorClaims);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for OperatorAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("Missing or invalid Authorization header");
                AppError::Unauthorized
            })?;

        if !auth_header.to_ascii_lowercase().starts_with("bearer ") {
            tracing::debug!("Authorization header doesn't start with 'Bearer '");
            return Err(AppError::Unauthorized);
        }

        let token = auth_header[7..].trim();
        if token.is_empty() {
            tracing::debug!("Empty bearer token in Authorization header");
            return Err(AppError::Unauthorized);
        }

        let claims = decode_operator_token(&state.config.jwt.secret, token)?;

        match claims.role.as_deref() {
            Some(role) if OPERATOR_ROLES.contains(&role) => {
                tracing::debug!("Authenticated operator: {} ({})", claims.sub, role);
                Ok(OperatorAuth(claims))
            }
            other => {
                tracing::debug!("User {} has no operator role ({:?})", claims.sub, other);
                Err(AppError::Forbidden)
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn operator_token(secret: &str, role: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now();
    let claims = OperatorClaims {
        sub: "operator-1".to_string(),
        role: Some(role.to_string()),
        iat: now.timestamp() as usize,
        exp: (now + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
