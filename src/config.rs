use std::env;

use chrono::FixedOffset;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub google: GoogleConfig,
    pub provider: ProviderConfig,
    pub email: EmailConfig,
    pub jwt: JwtConfig,
    pub http: HttpConfig,
    pub rate_limit: RateLimitConfig,
    pub notification_retry: NotificationRetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Service-account credentials and endpoints for the external calendar.
///
/// Secrets are optional at startup: a missing value only fails the requests
/// that need it, with a configuration error.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    pub client_email: Option<String>,
    /// PEM-encoded PKCS#8 private key. Escaped `\n` sequences are unescaped on load.
    pub private_key: Option<String>,
    pub calendar_id: Option<String>,
    pub token_uri: String,
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Fixed UTC offset of the provider, in minutes (e.g. -300 for UTC-05:00).
    pub utc_offset_minutes: i32,
    /// IANA timezone id sent to the calendar API with created events.
    pub timezone: String,
    /// Display name used in confirmation emails.
    pub display_name: String,
    /// Prefix of the summary of created calendar events.
    pub event_prefix: String,
}

impl ProviderConfig {
    pub fn offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Resend API key. When absent, confirmation emails are skipped.
    pub resend_api_key: Option<String>,
    pub api_url: String,
    pub from_address: String,
    /// Language of patient-facing emails ("es" or "en").
    pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Shared secret used to verify operator bearer tokens (HS256).
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Timeout applied to every outbound HTTP call.
    pub timeout_seconds: u64,
    /// Attempts for retryable calls (token exchange, event listing).
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for public endpoints
    pub public_per_second: u32,
    /// Burst size for public endpoints
    pub public_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationRetryConfig {
    /// Whether the notification retry worker is enabled.
    pub enabled: bool,
    /// Initial backoff in seconds for the first retry attempt.
    pub initial_backoff_seconds: u64,
    /// How often (seconds) the worker polls for due tasks.
    pub poll_interval_seconds: u64,
    /// Maximum number of delivery attempts before moving the task to DLQ.
    pub max_attempts: u32,
    /// Maximum tasks claimed per poll.
    pub worker_concurrency: u32,
    /// Cap for exponential backoff (seconds).
    pub max_backoff_seconds: u64,
    /// How long a queued confirmation email stays deliverable.
    pub ttl_seconds: u64,
}

fn parse_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let utc_offset_minutes: i32 = match env::var("PROVIDER_UTC_OFFSET_MINUTES") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PROVIDER_UTC_OFFSET_MINUTES".to_string()))?,
            Err(_) => defaults.provider.utc_offset_minutes,
        };

        let provider = ProviderConfig {
            utc_offset_minutes,
            timezone: env::var("PROVIDER_TIMEZONE").unwrap_or(defaults.provider.timezone),
            display_name: env::var("PROVIDER_DISPLAY_NAME")
                .unwrap_or(defaults.provider.display_name),
            event_prefix: env::var("CALENDAR_EVENT_PREFIX")
                .unwrap_or(defaults.provider.event_prefix),
        };

        if provider.offset().is_none() {
            return Err(ConfigError::InvalidValue(
                "PROVIDER_UTC_OFFSET_MINUTES".to_string(),
            ));
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/agenda.db".to_string()),
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5),
            },
            google: GoogleConfig {
                client_email: non_empty("GOOGLE_CLIENT_EMAIL"),
                private_key: non_empty("GOOGLE_PRIVATE_KEY").map(|k| k.replace("\\n", "\n")),
                calendar_id: non_empty("GOOGLE_CALENDAR_ID"),
                token_uri: env::var("GOOGLE_TOKEN_URI").unwrap_or(defaults.google.token_uri),
                api_base_url: env::var("GOOGLE_API_BASE_URL")
                    .unwrap_or(defaults.google.api_base_url),
            },
            provider,
            email: EmailConfig {
                resend_api_key: non_empty("RESEND_API_KEY"),
                api_url: env::var("RESEND_API_URL").unwrap_or(defaults.email.api_url),
                from_address: env::var("EMAIL_FROM").unwrap_or(defaults.email.from_address),
                language: env::var("EMAIL_LANGUAGE").unwrap_or(defaults.email.language),
            },
            jwt: JwtConfig {
                secret: non_empty("JWT_SECRET")
                    .ok_or_else(|| ConfigError::MissingEnv("JWT_SECRET".to_string()))?,
            },
            http: HttpConfig {
                timeout_seconds: parse_or("HTTP_TIMEOUT_SECONDS", 10u64),
                max_attempts: parse_or("HTTP_MAX_ATTEMPTS", 3usize),
                initial_backoff_ms: parse_or("HTTP_INITIAL_BACKOFF_MS", 500u64),
                max_backoff_ms: parse_or("HTTP_MAX_BACKOFF_MS", 5_000u64),
            },
            rate_limit: RateLimitConfig {
                public_per_second: parse_or("RATE_LIMIT_PUBLIC_PER_SECOND", 5),
                public_burst: parse_or("RATE_LIMIT_PUBLIC_BURST", 20),
            },
            notification_retry: NotificationRetryConfig {
                enabled: parse_bool("NOTIFICATION_RETRY_ENABLED", true),
                initial_backoff_seconds: parse_or(
                    "NOTIFICATION_RETRY_INITIAL_BACKOFF_SECONDS",
                    30u64,
                ),
                poll_interval_seconds: parse_or("NOTIFICATION_RETRY_POLL_INTERVAL_SECONDS", 5u64),
                max_attempts: parse_or("NOTIFICATION_RETRY_MAX_ATTEMPTS", 5u32),
                worker_concurrency: parse_or("NOTIFICATION_RETRY_WORKER_CONCURRENCY", 10u32),
                max_backoff_seconds: parse_or("NOTIFICATION_RETRY_MAX_BACKOFF_SECONDS", 3600u64),
                // Confirmation emails are useless after the appointment, keep them for a day.
                ttl_seconds: parse_or("NOTIFICATION_TTL_SECONDS", 86_400u64),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:5173".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/agenda.db".to_string(),
                max_connections: 5,
            },
            google: GoogleConfig {
                client_email: None,
                private_key: None,
                calendar_id: None,
                token_uri: "https://oauth2.googleapis.com/token".to_string(),
                api_base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            },
            provider: ProviderConfig {
                utc_offset_minutes: -300,
                timezone: "America/Bogota".to_string(),
                display_name: "Agenda".to_string(),
                event_prefix: "PSI".to_string(),
            },
            email: EmailConfig {
                resend_api_key: None,
                api_url: "https://api.resend.com/emails".to_string(),
                from_address: "Agenda <onboarding@resend.dev>".to_string(),
                language: "es".to_string(),
            },
            jwt: JwtConfig {
                secret: String::new(),
            },
            http: HttpConfig {
                timeout_seconds: 10,
                max_attempts: 3,
                initial_backoff_ms: 500,
                max_backoff_ms: 5_000,
            },
            rate_limit: RateLimitConfig {
                public_per_second: 5,
                public_burst: 20,
            },
            notification_retry: NotificationRetryConfig {
                enabled: true,
                initial_backoff_seconds: 30,
                poll_interval_seconds: 5,
                max_attempts: 5,
                worker_concurrency: 10,
                max_backoff_seconds: 3600,
                ttl_seconds: 86_400,
            },
        }
    }
}
