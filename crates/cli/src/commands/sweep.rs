//! On-demand drift sweep.
//!
//! # Usage
//!
//! ```bash
//! sb-cli sweep
//! ```
//!
//! Orders the sweep confirms are shipped before the command exits; nothing
//! else re-drives a paid order without a shipment. Uses the same environment
//! as the fulfillment service.

use sweetbox_fulfillment::config::{ConfigError, FulfillmentConfig};
use sweetbox_fulfillment::db::{self, PgOrderLedger, RepositoryError};
use sweetbox_fulfillment::payments::{PaymentError, StripeClient};
use sweetbox_fulfillment::services::{DriftSweep, ShipmentTrigger, ShippedSweep};
use sweetbox_fulfillment::shipping::{ShippingError, ShippoClient};
use thiserror::Error;

/// Errors that stop a sweep before it runs.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] RepositoryError),

    #[error("Payment client error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Shipping client error: {0}")]
    Shipping(#[from] ShippingError),
}

/// Run one sweep, ship what it confirmed and print the report as JSON.
///
/// # Errors
///
/// Returns an error if configuration, the database or the clients cannot be
/// set up, or if pending orders cannot be listed.
pub async fn run() -> Result<ShippedSweep, SweepError> {
    let config = FulfillmentConfig::from_env()?;
    let pool = db::create_pool(&config.database_url).await?;
    let ledger = PgOrderLedger::new(pool, config.ledger_timeout);
    let processor = StripeClient::new(&config.stripe)?;
    let trigger = ShipmentTrigger::new(ledger.clone(), ShippoClient::new(&config.shippo)?);

    let sweep = DriftSweep::new(ledger, processor, config.sweep.stale_after);
    let shipped = sweep.sweep_and_ship(&trigger).await?;

    #[allow(clippy::print_stdout)]
    {
        println!(
            "{}",
            serde_json::to_string_pretty(&shipped.report).unwrap_or_default()
        );
    }

    Ok(shipped)
}
