//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use checkout::{CheckoutMode, RetryPolicy};

/// Output format of the fmt tracing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset means the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `CHECKOUT_MAX_ATTEMPTS`: attempts per unit of work (default: `3`)
/// - `CHECKOUT_RETRY_BACKOFF_MS`: base retry backoff (default: `25`)
/// - `CHECKOUT_MODE`: `await-gateway` or `immediate-paid` (default: `await-gateway`)
/// - `SEED_CATALOG`: load the sample catalog on startup (default: `true`)
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub checkout_max_attempts: u32,
    pub checkout_retry_backoff_ms: u64,
    pub checkout_mode: CheckoutMode,
    pub seed_catalog: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: parse_var(&lookup, "DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            checkout_max_attempts: parse_var(&lookup, "CHECKOUT_MAX_ATTEMPTS")
                .unwrap_or(defaults.checkout_max_attempts),
            checkout_retry_backoff_ms: parse_var(&lookup, "CHECKOUT_RETRY_BACKOFF_MS")
                .unwrap_or(defaults.checkout_retry_backoff_ms),
            checkout_mode: parse_var(&lookup, "CHECKOUT_MODE").unwrap_or(defaults.checkout_mode),
            seed_catalog: lookup("SEED_CATALOG")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.seed_catalog),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.checkout_max_attempts,
            Duration::from_millis(self.checkout_retry_backoff_ms),
        )
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 5,
            checkout_max_attempts: 3,
            checkout_retry_backoff_ms: 25,
            checkout_mode: CheckoutMode::AwaitGateway,
            seed_catalog: true,
        }
    }
}
