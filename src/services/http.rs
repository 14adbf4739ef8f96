//! Outbound HTTP plumbing shared by the calendar, token and email clients.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::config::HttpConfig;
use crate::error::{AppError, AppResult};

/// Bounded exponential backoff for idempotent requests.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed after {attempts} attempt(s): {source}")]
    Network {
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream kept failing after {attempts} attempt(s) with status {status}: {body}")]
    Exhausted {
        attempts: usize,
        status: StatusCode,
        body: String,
    },
}

/// Build a client with the configured per-request timeout.
pub fn build_client(config: &HttpConfig) -> AppResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .map_err(|e| AppError::Internal(e.into()))
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send a request, retrying on 429, 5xx and network errors (timeouts included).
///
/// Any other response is returned as-is, the caller decides what a 4xx means.
/// Only use this for requests that are safe to repeat.
pub async fn send_with_backoff<F>(
    policy: RetryPolicy,
    make_request: F,
) -> Result<Response, TransportError>
where
    F: Fn() -> RequestBuilder,
{
    let mut backoff = policy.initial_backoff;
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match make_request().send().await {
            Ok(resp) if is_transient(resp.status()) => {
                let status = resp.status();
                if attempt >= max_attempts {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(TransportError::Exhausted {
                        attempts: attempt,
                        status,
                        body,
                    });
                }

                // Respect Retry-After, but never wait longer than the policy allows.
                let wait = retry_after(&resp)
                    .unwrap_or(backoff)
                    .min(policy.max_backoff);

                tracing::warn!(
                    "Transient upstream error (status: {}). Retrying in {:?} (attempt {}/{})",
                    status,
                    wait,
                    attempt,
                    max_attempts
                );

                tokio::time::sleep(wait).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Ok(resp) => return Ok(resp),
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(TransportError::Network {
                        attempts: attempt,
                        source: e,
                    });
                }

                tracing::warn!(
                    "HTTP request failed: {}. Retrying in {:?} (attempt {}/{})",
                    e,
                    backoff,
                    attempt,
                    max_attempts
                );

                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn fast_retry(max_attempts: usize) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "1"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/flaky", server.uri());
        let resp = send_with_backoff(fast_retry(3), || client.get(&url))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let resp = send_with_backoff(fast_retry(3), || client.get(server.uri()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(2)
            .mount(&server)
            .await;

        let client = Client::new();
        let err = send_with_backoff(fast_retry(2), || client.get(server.uri()))
            .await
            .unwrap_err();
        match err {
            TransportError::Exhausted {
                attempts,
                status,
                body,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
