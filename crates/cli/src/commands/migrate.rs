//! Database migration commands.
//!
//! # Usage
//!
//! ```bash
//! sb-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `FULFILLMENT_DATABASE_URL` - `PostgreSQL` connection string (falls back
//!   to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! `crates/fulfillment/migrations/`. The session table the storefront shares
//! is created here too, so a fresh database is usable by both services.

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use thiserror::Error;

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration failed to apply.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Read the database URL, preferring the service-specific variable.
///
/// # Errors
///
/// Returns [`MigrationError::MissingEnvVar`] if neither variable is set.
pub fn database_url() -> Result<SecretString, MigrationError> {
    dotenvy::dotenv().ok();

    std::env::var("FULFILLMENT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| MigrationError::MissingEnvVar("FULFILLMENT_DATABASE_URL"))
}

/// Run fulfillment database migrations.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn fulfillment() -> Result<(), MigrationError> {
    let database_url = database_url()?;

    tracing::info!("Connecting to fulfillment database...");
    let pool = PgPool::connect(database_url.expose_secret()).await?;

    tracing::info!("Running fulfillment migrations...");
    sqlx::migrate!("../fulfillment/migrations").run(&pool).await?;

    tracing::info!("Fulfillment migrations complete");
    Ok(())
}
