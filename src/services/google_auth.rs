//! Service-account access tokens for the Google APIs.
//!
//! A signed RS256 assertion is exchanged at the token endpoint using the
//! JWT-bearer grant. Tokens are cached per scope and refreshed shortly before
//! they expire; concurrent callers share a single refresh.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::GoogleConfig;
use crate::error::{AppError, AppResult};
use crate::services::http::{send_with_backoff, RetryPolicy};

pub const SCOPE_CALENDAR_READONLY: &str = "https://www.googleapis.com/auth/calendar.readonly";
pub const SCOPE_CALENDAR: &str = "https://www.googleapis.com/auth/calendar";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

/// Source of bearer tokens for a given OAuth scope.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A token valid for at least the refresh margin.
    async fn access_token(&self, scope: &str) -> AppResult<String>;

    /// Drop a cached token the upstream refused.
    async fn invalidate(&self, scope: &str);
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

pub struct ServiceAccountTokenIssuer {
    client: Client,
    client_email: Option<String>,
    private_key: Option<String>,
    token_uri: String,
    retry: RetryPolicy,
    cache: RwLock<HashMap<String, AccessToken>>,
    /// One single-flight lock per scope.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ServiceAccountTokenIssuer {
    pub fn new(client: Client, config: &GoogleConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            client_email: config.client_email.clone(),
            private_key: config.private_key.clone(),
            token_uri: config.token_uri.clone(),
            retry,
            cache: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    fn sign_assertion(&self, scope: &str, now: DateTime<Utc>) -> AppResult<String> {
        let client_email = self.client_email.as_deref().ok_or_else(|| {
            AppError::Configuration("GOOGLE_CLIENT_EMAIL is not set".to_string())
        })?;
        let private_key = self.private_key.as_deref().ok_or_else(|| {
            AppError::Configuration("GOOGLE_PRIVATE_KEY is not set".to_string())
        })?;

        let key = EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|e| {
            AppError::Configuration(format!("GOOGLE_PRIVATE_KEY is not a valid RSA key: {}", e))
        })?;

        let claims = AssertionClaims {
            iss: client_email,
            scope,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| AppError::Configuration(format!("Failed to sign assertion: {}", e)))
    }

    /// Exchange a fresh assertion for an access token, bypassing the cache.
    pub async fn issue_token(&self, scope: &str) -> AppResult<AccessToken> {
        let now = Utc::now();
        let assertion = self.sign_assertion(scope, now)?;

        let response = send_with_backoff(self.retry, || {
            self.client.post(&self.token_uri).form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
        })
        .await
        .map_err(|e| AppError::AuthExchange(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::AuthExchange(format!(
                "token endpoint returned {}: {}",
                status, error_text
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            AppError::AuthExchange(format!("Failed to parse token response: {}", e))
        })?;

        let expires_at = Duration::try_seconds(body.expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AppError::AuthExchange(format!("Invalid token lifetime: {}s", body.expires_in))
            })?;
        tracing::debug!(
            "Issued service account token for {} (expires at {})",
            scope,
            expires_at
        );

        Ok(AccessToken {
            token: body.access_token,
            expires_at,
        })
    }

    async fn cached(&self, scope: &str) -> Option<String> {
        let guard = self.cache.read().await;
        guard
            .get(scope)
            .filter(|t| t.is_fresh(Utc::now()))
            .map(|t| t.token.clone())
    }

    async fn refresh_lock(&self, scope: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .lock()
            .await
            .entry(scope.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenIssuer {
    async fn access_token(&self, scope: &str) -> AppResult<String> {
        if let Some(token) = self.cached(scope).await {
            return Ok(token);
        }

        // Single-flight per scope: whoever gets the lock refreshes, the others
        // re-check the cache.
        let lock = self.refresh_lock(scope).await;
        let _refresh = lock.lock().await;
        if let Some(token) = self.cached(scope).await {
            return Ok(token);
        }

        let issued = self.issue_token(scope).await?;
        let token = issued.token.clone();
        self.cache.write().await.insert(scope.to_string(), issued);

        Ok(token)
    }

    async fn invalidate(&self, scope: &str) {
        self.cache.write().await.remove(scope);
    }
}
