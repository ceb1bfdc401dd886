//! Fulfillment service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `FULFILLMENT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `FULFILLMENT_BASE_URL` - Public URL for the service
//! - `STRIPE_SECRET_KEY` - Payment processor API secret key
//! - `SHIPPO_API_TOKEN` - Shipping provider API token
//! - `SHIP_FROM_NAME`, `SHIP_FROM_STREET1`, `SHIP_FROM_CITY`, `SHIP_FROM_STATE`,
//!   `SHIP_FROM_POSTAL_CODE`, `SHIP_FROM_COUNTRY` - Origin address for labels
//!
//! ## Optional
//! - `STRIPE_WEBHOOK_SECRET` - Webhook signing secret (webhooks are rejected while unset)
//! - `FULFILLMENT_HOST` - Bind address (default: 127.0.0.1)
//! - `FULFILLMENT_PORT` - Listen port (default: 3100)
//! - `STRIPE_API_BASE` - Payment processor API base (default: <https://api.stripe.com>)
//! - `SHIPPO_API_BASE` - Shipping provider API base (default: <https://api.goshippo.com>)
//! - `SHIP_FROM_STREET2`, `SHIP_FROM_PHONE`, `SHIP_FROM_EMAIL`
//! - `CHECKOUT_METADATA_LIMIT_BYTES` - Max compact order payload size (default: 500)
//! - `CHECKOUT_ALLOWED_COUNTRIES` - Comma-separated shipping countries (default: US)
//! - `CHECKOUT_CURRENCY` - Checkout currency (default: usd)
//! - `WEBHOOK_TOLERANCE_SECS` - Signature timestamp tolerance (default: 300)
//! - `HTTP_TIMEOUT_SECS` - Outbound API timeout (default: 15)
//! - `LEDGER_TIMEOUT_SECS` - Order ledger operation timeout (default: 10)
//! - `SWEEP_INTERVAL_SECS` - Drift sweep interval, 0 disables (default: 900)
//! - `SWEEP_STALE_AFTER_HOURS` - Age after which sessionless orders fail (default: 24)
//! - `ADMIN_API_TOKEN` - Enables `POST /admin/sweep`
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::SecretString;
use sweetbox_core::CurrencyCode;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
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

/// Fulfillment application configuration.
#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the service
    pub base_url: String,
    /// Payment processor configuration
    pub stripe: StripeConfig,
    /// Shipping provider configuration
    pub shippo: ShippoConfig,
    /// Checkout session settings
    pub checkout: CheckoutSettings,
    /// Drift sweep settings
    pub sweep: SweepSettings,
    /// Timeout for a single order ledger operation
    pub ledger_timeout: Duration,
    /// Bearer token for administrative endpoints
    pub admin_api_token: Option<SecretString>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Payment processor configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    /// API base URL
    pub api_base: Url,
    /// Secret API key
    pub secret_key: SecretString,
    /// Webhook signing secret
    pub webhook_secret: Option<SecretString>,
    /// Accepted age of a webhook signature timestamp
    pub webhook_tolerance: Duration,
    /// Outbound request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base.as_str())
            .field("secret_key", &"[REDACTED]")
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("webhook_tolerance", &self.webhook_tolerance)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Shipping provider configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct ShippoConfig {
    /// API base URL
    pub api_base: Url,
    /// API token
    pub api_token: SecretString,
    /// Origin address printed on labels
    pub ship_from: ShipFromAddress,
    /// Outbound request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for ShippoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShippoConfig")
            .field("api_base", &self.api_base.as_str())
            .field("api_token", &"[REDACTED]")
            .field("ship_from", &self.ship_from)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Warehouse origin address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipFromAddress {
    pub name: String,
    pub street1: String,
    pub street2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Settings applied to every outbound checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSettings {
    /// Maximum size of the compact order payload, in bytes
    pub metadata_limit_bytes: usize,
    /// Countries the hosted checkout may collect shipping addresses for
    pub allowed_countries: Vec<String>,
    /// Currency for session line items
    pub currency: CurrencyCode,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            metadata_limit_bytes: sweetbox_core::intent::DEFAULT_METADATA_LIMIT_BYTES,
            allowed_countries: vec!["US".to_string()],
            currency: CurrencyCode::USD,
        }
    }
}

/// Drift sweep settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    /// Background interval; `None` disables the background task
    pub interval: Option<Duration>,
    /// Orders older than this with no matching session are marked failed
    pub stale_after: chrono::Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(900)),
            stale_after: chrono::Duration::hours(24),
        }
    }
}

impl FulfillmentConfig {
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

        let database_url = get_database_url("FULFILLMENT_DATABASE_URL")?;
        let host = get_env_or_default("FULFILLMENT_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("FULFILLMENT_HOST".to_string(), e.to_string())
            })?;
        let port = parse_env_or_default("FULFILLMENT_PORT", 3100_u16)?;
        let base_url = get_required_env("FULFILLMENT_BASE_URL")?;
        Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("FULFILLMENT_BASE_URL".to_string(), e.to_string())
        })?;

        let http_timeout = Duration::from_secs(parse_env_or_default("HTTP_TIMEOUT_SECS", 15)?);
        let stripe = StripeConfig::from_env(http_timeout)?;
        let shippo = ShippoConfig::from_env(http_timeout)?;
        let checkout = CheckoutSettings::from_env()?;
        let sweep = SweepSettings::from_env()?;
        let ledger_timeout = Duration::from_secs(parse_env_or_default("LEDGER_TIMEOUT_SECS", 10)?);

        let admin_api_token = get_optional_env("ADMIN_API_TOKEN")
            .map(|token| {
                validate_secret_strength(&token, "ADMIN_API_TOKEN")?;
                Ok::<_, ConfigError>(SecretString::from(token))
            })
            .transpose()?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            stripe,
            shippo,
            checkout,
            sweep,
            ledger_timeout,
            admin_api_token,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl StripeConfig {
    fn from_env(timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base: get_url_or_default("STRIPE_API_BASE", "https://api.stripe.com")?,
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: get_optional_env("STRIPE_WEBHOOK_SECRET").map(SecretString::from),
            webhook_tolerance: Duration::from_secs(parse_env_or_default(
                "WEBHOOK_TOLERANCE_SECS",
                300,
            )?),
            timeout,
        })
    }
}

impl ShippoConfig {
    fn from_env(timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base: get_url_or_default("SHIPPO_API_BASE", "https://api.goshippo.com")?,
            api_token: get_validated_secret("SHIPPO_API_TOKEN")?,
            ship_from: ShipFromAddress {
                name: get_required_env("SHIP_FROM_NAME")?,
                street1: get_required_env("SHIP_FROM_STREET1")?,
                street2: get_optional_env("SHIP_FROM_STREET2"),
                city: get_required_env("SHIP_FROM_CITY")?,
                state: get_required_env("SHIP_FROM_STATE")?,
                postal_code: get_required_env("SHIP_FROM_POSTAL_CODE")?,
                country: get_required_env("SHIP_FROM_COUNTRY")?,
                phone: get_optional_env("SHIP_FROM_PHONE"),
                email: get_optional_env("SHIP_FROM_EMAIL"),
            },
            timeout,
        })
    }
}

impl CheckoutSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let allowed_countries = get_optional_env("CHECKOUT_ALLOWED_COUNTRIES").map_or(
            defaults.allowed_countries,
            |raw| parse_country_list(&raw),
        );
        if allowed_countries.is_empty() {
            return Err(ConfigError::InvalidEnvVar(
                "CHECKOUT_ALLOWED_COUNTRIES".to_string(),
                "at least one country is required".to_string(),
            ));
        }

        let currency = get_env_or_default("CHECKOUT_CURRENCY", "usd")
            .parse::<CurrencyCode>()
            .map_err(|e| ConfigError::InvalidEnvVar("CHECKOUT_CURRENCY".to_string(), e))?;

        Ok(Self {
            metadata_limit_bytes: parse_env_or_default(
                "CHECKOUT_METADATA_LIMIT_BYTES",
                defaults.metadata_limit_bytes,
            )?,
            allowed_countries,
            currency,
        })
    }
}

impl SweepSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let interval_secs: u64 = parse_env_or_default("SWEEP_INTERVAL_SECS", 900)?;
        let stale_hours: i64 = parse_env_or_default("SWEEP_STALE_AFTER_HOURS", 24)?;
        if stale_hours <= 0 {
            return Err(ConfigError::InvalidEnvVar(
                "SWEEP_STALE_AFTER_HOURS".to_string(),
                "must be positive".to_string(),
            ));
        }

        Ok(Self {
            interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
            stale_after: chrono::Duration::hours(stale_hours),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
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

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, using `default` when unset.
fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Parse a URL environment variable, using `default` when unset.
fn get_url_or_default(key: &str, default: &str) -> Result<Url, ConfigError> {
    Url::parse(&get_env_or_default(key, default))
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Split a comma-separated country list into uppercase ISO codes.
fn parse_country_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_ascii_uppercase)
        .collect()
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
