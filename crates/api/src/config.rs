//! Application configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `AUTH_TOKEN_SECRET` - key used to verify bearer tokens
//!
//! ## Optional
//! - `HOST` - bind address (default: `0.0.0.0`)
//! - `PORT` - listen port (default: `3000`)
//! - `RUST_LOG` - tracing filter directive (default: `info`)
//! - `LOG_FORMAT` - `json` for JSON logs, anything else for plain text
//! - `DATABASE_URL` - PostgreSQL connection string; in-memory store when unset
//! - `DATABASE_MAX_CONNECTIONS` - pool size (default: `10`)
//! - `PAYMENT_SECRET_KEY` - gateway API key; in-memory gateway when unset
//! - `PAYMENT_API_BASE` - gateway base URL (default: `https://api.stripe.com`)
//! - `PAYMENT_CURRENCY` - ISO currency code sent to the gateway (default: `npr`)
//! - `FRONTEND_URL` - storefront base URL for payment redirects
//!   (default: `http://localhost:5173`)
//! - `PAYMENT_WEBHOOK_SECRET` - webhook signing secret; webhooks are refused when unset
//! - `IDENTITY_WEBHOOK_SECRET` - signing secret for user sync events from the
//!   identity provider; sync events are refused when unset

use secrecy::SecretString;
use thiserror::Error;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Payment gateway settings.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PaymentConfig {
    pub secret_key: Option<SecretString>,
    pub api_base: String,
    pub currency: String,
    pub frontend_url: String,
    pub webhook_secret: Option<SecretString>,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &Option<SecretString>| s.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("PaymentConfig")
            .field("secret_key", &redact(&self.secret_key))
            .field("api_base", &self.api_base)
            .field("currency", &self.currency)
            .field("frontend_url", &self.frontend_url)
            .field("webhook_secret", &redact(&self.webhook_secret))
            .finish()
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            api_base: payments::stripe::DEFAULT_API_BASE.to_string(),
            currency: "npr".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            webhook_secret: None,
        }
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Contains the database password.
    pub database_url: Option<SecretString>,
    pub database_max_connections: u32,
    pub payment: PaymentConfig,
    pub auth_token_secret: SecretString,
    pub identity_webhook_secret: Option<SecretString>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("database_max_connections", &self.database_max_connections)
            .field("payment", &self.payment)
            .field("auth_token_secret", &"[REDACTED]")
            .field(
                "identity_webhook_secret",
                &self.identity_webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// optional values. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secret = |key: &str| get(key).map(SecretString::from);
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(raw) => parse(&raw, "PORT")?,
            None => defaults.port,
        };
        let database_max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => parse(&raw, "DATABASE_MAX_CONNECTIONS")?,
            None => defaults.database_max_connections,
        };
        let log_format = match get("LOG_FORMAT").as_deref() {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: secret("DATABASE_URL"),
            database_max_connections,
            payment: PaymentConfig {
                secret_key: secret("PAYMENT_SECRET_KEY"),
                api_base: get("PAYMENT_API_BASE").unwrap_or(defaults.payment.api_base),
                currency: get("PAYMENT_CURRENCY")
                    .map(|c| c.to_lowercase())
                    .unwrap_or(defaults.payment.currency),
                frontend_url: get("FRONTEND_URL").unwrap_or(defaults.payment.frontend_url),
                webhook_secret: secret("PAYMENT_WEBHOOK_SECRET"),
            },
            auth_token_secret: secret("AUTH_TOKEN_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("AUTH_TOKEN_SECRET".to_string()))?,
            identity_webhook_secret: secret("IDENTITY_WEBHOOK_SECRET"),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Development defaults. The token secret is a fixed development key.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            payment: PaymentConfig::default(),
            auth_token_secret: SecretString::from("development-token-secret".to_string()),
            identity_webhook_secret: None,
        }
    }
}
