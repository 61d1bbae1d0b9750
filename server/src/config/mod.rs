use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::admission::policy::PolicyKind;
use crate::admission::RetryPolicy;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/roster";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub store_backend: StoreBackend,
    pub bind_addr: SocketAddr,
    pub retry: RetryPolicy,
    pub lock_timeout: Duration,
    pub attendee_policy: PolicyKind,
    pub cors_allowed_origins: String,
    pub production: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Invalid values fall back to
    /// their default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            database_url: parsed("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                parsed("DATABASE_MAX_CONNECTIONS"),
                5,
            ),
            store_backend: parse_or(
                "STORE_BACKEND",
                parsed("STORE_BACKEND"),
                StoreBackend::Postgres,
            ),
            bind_addr: parse_or(
                "BIND_ADDR",
                parsed("BIND_ADDR"),
                SocketAddr::from(([0, 0, 0, 0], 3001)),
            ),
            retry: RetryPolicy {
                max_retries: parse_or(
                    "ADMISSION_MAX_RETRIES",
                    parsed("ADMISSION_MAX_RETRIES"),
                    3,
                ),
                backoff: Duration::from_millis(parse_or(
                    "ADMISSION_RETRY_BACKOFF_MS",
                    parsed("ADMISSION_RETRY_BACKOFF_MS"),
                    10,
                )),
            },
            lock_timeout: Duration::from_millis(parse_or(
                "DB_LOCK_TIMEOUT_MS",
                parsed("DB_LOCK_TIMEOUT_MS"),
                2000,
            )),
            attendee_policy: parse_or(
                "ATTENDEE_POLICY",
                parsed("ATTENDEE_POLICY"),
                PolicyKind::Standard,
            ),
            cors_allowed_origins: parsed("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|| cors::DEFAULT_ALLOWED_ORIGINS.to_string()),
            production: parsed("RUST_ENV")
                .map(|v| v.to_lowercase() == "production")
                .unwrap_or(false),
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Config: invalid {}='{}' ({}), using default", key, raw, e);
                default
            }
        },
    }
}
