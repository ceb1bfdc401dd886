//! Best-effort shipment creation after payment is reconciled.
//!
//! Runs strictly after the ledger commit and outside any request's error
//! path: every failure is logged and swallowed.

use sweetbox_core::OrderId;
use sweetbox_core::address::CanonicalAddress;
use sweetbox_core::parcel::Parcel;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::db::{OrderLedger, OrderPatch, RepositoryError, UpdateGuard, UpdateOutcome};
use crate::shipping::{ShipmentRequest, ShippingProvider};

/// A paid order ready to ship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentHandoff {
    pub order_id: OrderId,
    pub address: CanonicalAddress,
}

/// What a trigger run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipmentOutcome {
    /// A label was purchased and its reference stored on the order.
    Created { shipment_id: String },
    /// The order already carried a shipment reference.
    AlreadyShipped,
    /// The provider returned no rates.
    NoRates,
    /// The order no longer exists.
    OrderMissing,
    /// Some step failed; details are in the logs.
    Failed,
}

/// Requests rates, buys the first one and records the shipment on the order.
#[derive(Debug, Clone)]
pub struct ShipmentTrigger<L, S> {
    ledger: L,
    provider: S,
    parcels: Vec<Parcel>,
}

impl<L: OrderLedger, S: ShippingProvider> ShipmentTrigger<L, S> {
    /// Create a trigger shipping every order as one default parcel.
    #[must_use]
    pub fn new(ledger: L, provider: S) -> Self {
        Self {
            ledger,
            provider,
            parcels: vec![Parcel::DEFAULT],
        }
    }

    /// Run the trigger in a background task.
    pub fn spawn(&self, handoff: ShipmentHandoff) -> JoinHandle<ShipmentOutcome> {
        let trigger = self.clone();
        tokio::spawn(async move { trigger.trigger(&handoff).await })
    }

    /// Create a shipment for the order unless it already has one.
    #[instrument(skip(self, handoff), fields(order_id = %handoff.order_id))]
    pub async fn trigger(&self, handoff: &ShipmentHandoff) -> ShipmentOutcome {
        // Shipment state comes from the ledger, not from the caller.
        match self.ledger.get(handoff.order_id).await {
            Ok(Some(order)) if order.has_shipment() => {
                info!("Order already has a shipment, skipping");
                return ShipmentOutcome::AlreadyShipped;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("Order disappeared before shipment creation");
                return ShipmentOutcome::OrderMissing;
            }
            Err(e) => {
                error!(error = %e, "Failed to load order for shipment");
                return ShipmentOutcome::Failed;
            }
        }

        let rates = match self.provider.get_rates(&handoff.address, &self.parcels).await {
            Ok(rates) => rates,
            Err(e) => {
                error!(error = %e, "Failed to fetch shipping rates");
                return ShipmentOutcome::Failed;
            }
        };

        let Some(rate) = rates.first() else {
            warn!("No shipping rates returned");
            return ShipmentOutcome::NoRates;
        };

        let request = ShipmentRequest {
            order_id: handoff.order_id,
            to: handoff.address.clone(),
            parcels: self.parcels.clone(),
        };
        let shipment = match self.provider.create_shipment(&request, &rate.rate_id).await {
            Ok(shipment) => shipment,
            Err(e) => {
                error!(error = %e, rate_id = %rate.rate_id, "Failed to create shipment");
                return ShipmentOutcome::Failed;
            }
        };

        match self
            .ledger
            .update(
                handoff.order_id,
                OrderPatch::shipment(shipment.shipment_id.clone()),
                UpdateGuard::ShipmentUnset,
            )
            .await
        {
            Ok(UpdateOutcome::Applied(_)) => {
                info!(
                    shipment_id = %shipment.shipment_id,
                    carrier = %rate.carrier,
                    service = %rate.service_name,
                    "Shipment created"
                );
                ShipmentOutcome::Created {
                    shipment_id: shipment.shipment_id,
                }
            }
            Ok(UpdateOutcome::Skipped(order)) => {
                warn!(
                    shipment_id = %shipment.shipment_id,
                    existing = ?order.shipment_id,
                    "Order gained a shipment concurrently; purchased label is unused"
                );
                ShipmentOutcome::AlreadyShipped
            }
            Err(RepositoryError::NotFound) => {
                error!(shipment_id = %shipment.shipment_id, "Order deleted after label purchase");
                ShipmentOutcome::OrderMissing
            }
            Err(e) => {
                error!(
                    error = %e,
                    shipment_id = %shipment.shipment_id,
                    "Failed to record shipment on order"
                );
                ShipmentOutcome::Failed
            }
        }
    }
}
