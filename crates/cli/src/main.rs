//! Sweetbox CLI - Database migrations and operational tools.
//!
//! # Usage
//!
//! ```bash
//! # Run fulfillment database migrations
//! sb-cli migrate
//!
//! # Run the drift sweep once and ship the orders it confirms
//! sb-cli sweep
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use sweetbox_fulfillment::services::ShipmentOutcome;

mod commands;

#[derive(Parser)]
#[command(name = "sb-cli")]
#[command(author, version, about = "Sweetbox CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Reconcile pending orders with the payment processor and ship the
    /// ones it confirms
    Sweep,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::fulfillment().await?,
        Commands::Sweep => {
            let shipped = commands::sweep::run().await?;
            if shipped.report.unresolved_count > 0 {
                tracing::warn!(
                    unresolved = shipped.report.unresolved_count,
                    "Some orders remain pending"
                );
            }
            let unshipped = shipped
                .shipments
                .iter()
                .filter(|(_, outcome)| !matches!(outcome, ShipmentOutcome::Created { .. }))
                .count();
            if unshipped > 0 {
                tracing::warn!(unshipped, "Some confirmed orders were not shipped");
            }
        }
    }
    Ok(())
}
