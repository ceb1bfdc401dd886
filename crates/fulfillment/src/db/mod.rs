//! Database operations for the fulfillment `PostgreSQL` schema.
//!
//! ## Tables
//!
//! - `fulfillment.order` - Order lifecycle and payment status
//! - `fulfillment.order_line_item` - Immutable order lines
//! - `fulfillment.product_inventory` - Stock on hand, decremented once per paid order
//! - `fulfillment.processed_event` - Payment events already reconciled
//! - `tower_sessions.session` - Tower-sessions storage (shared with the storefront)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/fulfillment/migrations/` and run via:
//! ```bash
//! cargo run -p sweetbox-cli -- migrate
//! ```

pub mod ledger;
pub mod memory;
pub mod orders;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use ledger::{CreateOutcome, OrderLedger, OrderPatch, UpdateGuard, UpdateOutcome};
pub use memory::InMemoryLedger;
pub use orders::PgOrderLedger;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Order data that cannot be stored (e.g., a total that overflows).
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Constraint violation (e.g., duplicate checkout session).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// Operation did not finish within the ledger timeout.
    #[error("ledger operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
