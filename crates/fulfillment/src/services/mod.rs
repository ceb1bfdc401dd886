//! Business logic services.
//!
//! # Services
//!
//! - `checkout` - Hosted checkout session creation
//! - `reconciliation` - Payment event state machine
//! - `shipment` - Best-effort label purchase after payment
//! - `sweep` - Drift reconciliation for orders stuck in `pending`

pub mod checkout;
pub mod reconciliation;
pub mod shipment;
pub mod sweep;

pub use checkout::{CartLine, CheckoutError, CheckoutOwner, CheckoutRedirect, CheckoutService};
pub use reconciliation::{Reconciliation, ReconcileError, ReconcileOutcome, ReconciliationEngine};
pub use shipment::{ShipmentHandoff, ShipmentOutcome, ShipmentTrigger};
pub use sweep::{DriftSweep, ShippedSweep, SweepReport, SweepRun};
