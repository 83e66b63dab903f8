//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `AMBASSADOR_DATABASE_URL` - `PostgreSQL` connection string
//! - `AMBASSADOR_BASE_URL` - Public URL used in verification links
//! - `AMBASSADOR_TOKEN_SECRET` - Session signing secret (min 32 chars, high entropy)
//! - `SMTP_HOST` - SMTP relay host
//! - `SMTP_USERNAME` - SMTP username
//! - `SMTP_PASSWORD` - SMTP password
//! - `EMAIL_FROM_ADDRESS` - Sender address for verification emails
//!
//! ## Optional
//! - `AMBASSADOR_HOST` - Bind address (default: 127.0.0.1)
//! - `AMBASSADOR_PORT` - Listen port (default: 3000)
//! - `SMTP_PORT` - SMTP relay port (default: 587)
//! - `RECONCILE_SOURCE_URL` - Reconciliation source to poll; polling is off when unset
//! - `RECONCILE_INTERVAL_SECS` - Poll period in seconds (default: 3600)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::services::email::EmailConfig;

const MIN_TOKEN_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Reconciliation poller configuration.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Source endpoint answering a JSON grid of referral rows.
    pub source_url: Option<String>,
    /// How often to poll it.
    pub period: Duration,
}

/// Ambassador server configuration.
#[derive(Debug, Clone)]
pub struct AmbassadorConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL used in verification links
    pub base_url: String,
    /// Session token signing secret
    pub token_secret: SecretString,
    /// SMTP delivery configuration
    pub email: EmailConfig,
    /// Reconciliation poller configuration
    pub reconcile: ReconcileConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl AmbassadorConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("AMBASSADOR_DATABASE_URL")?;
        let host = get_env_or_default("AMBASSADOR_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("AMBASSADOR_HOST".to_string(), e.to_string())
            })?;
        let port = parse_env_or_default("AMBASSADOR_PORT", 3000)?;
        let base_url = get_required_env("AMBASSADOR_BASE_URL")?;
        let token_secret = get_validated_secret("AMBASSADOR_TOKEN_SECRET")?;
        validate_token_secret(&token_secret, "AMBASSADOR_TOKEN_SECRET")?;

        let email = EmailConfig {
            smtp_host: get_required_env("SMTP_HOST")?,
            smtp_port: parse_env_or_default("SMTP_PORT", 587)?,
            smtp_username: get_required_env("SMTP_USERNAME")?,
            smtp_password: get_required_secret("SMTP_PASSWORD")?,
            from_address: get_required_env("EMAIL_FROM_ADDRESS")?,
        };

        let reconcile = ReconcileConfig {
            source_url: get_optional_env("RECONCILE_SOURCE_URL"),
            period: Duration::from_secs(parse_env_or_default("RECONCILE_INTERVAL_SECS", 3600)?),
        };

        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            token_secret,
            email,
            reconcile,
            sentry_dsn,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an environment variable parsed to `T`, with a default when unset.
fn parse_env_or_default<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Validate that the token secret meets minimum length requirements.
fn validate_token_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_TOKEN_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_TOKEN_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Real signing secrets are randomly generated and have high entropy.
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_of_repeated_char_is_zero() {
        assert!(shannon_entropy("aaaaaaaa") < f64::EPSILON);
    }

    #[test]
    fn test_random_secret_passes_strength_check() {
        // Shaped like a real generated secret.
        let secret = "kJ8fN2pQ7xW4mZ9vB3cR6tY1uH5gD0eA";
        assert!(validate_secret_strength(secret, "TEST").is_ok());
    }

    #[test]
    fn test_placeholder_secret_is_rejected() {
        let err = validate_secret_strength("your-session-secret-here", "TEST").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_low_entropy_secret_is_rejected() {
        let err = validate_secret_strength("aaaabbbbaaaabbbbaaaabbbbaaaabbbb", "TEST").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_short_token_secret_is_rejected() {
        let secret = SecretString::from("too-short");
        let err = validate_token_secret(&secret, "TEST").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }
}
