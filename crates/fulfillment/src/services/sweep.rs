//! Drift reconciliation sweep.
//!
//! Webhook delivery is not guaranteed. The sweep re-queries the processor for
//! every order still `pending` and forces it to a terminal state:
//!
//! | Session found | Session status | Order age     | Action            |
//! |---------------|----------------|---------------|-------------------|
//! | no            |                | > stale_after | mark `failed`     |
//! | no            |                | <= stale_after| leave (unresolved)|
//! | yes           | paid           | any           | mark `paid`       |
//! | yes           | unpaid         | any           | mark `failed`     |
//! | yes           | other          | any           | leave (unresolved)|

use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sweetbox_core::{OrderId, PaymentStatus};
use sweetbox_core::order::Order;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use super::reconciliation::{handoff_for, resolve_address};
use super::shipment::{ShipmentHandoff, ShipmentOutcome, ShipmentTrigger};
use crate::db::{OrderLedger, OrderPatch, RepositoryError, UpdateGuard, UpdateOutcome};
use crate::payments::types::SessionPaymentStatus;
use crate::payments::{CheckoutSession, PaymentProcessor};
use crate::shipping::ShippingProvider;

/// Orders checked against the processor concurrently.
const SWEEP_CONCURRENCY: usize = 4;

/// Sessions are searched from slightly before the order was written.
const SESSION_LOOKBACK: chrono::Duration = chrono::Duration::minutes(5);

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Orders moved to `confirmed/paid`.
    pub fixed_count: usize,
    /// Orders moved to `failed`.
    pub failed_count: usize,
    /// Orders left pending.
    pub unresolved_count: usize,
    /// Orders another writer resolved while the sweep was running.
    pub superseded_count: usize,
}

impl SweepReport {
    /// Orders the sweep looked at.
    #[must_use]
    pub const fn scanned(&self) -> usize {
        self.fixed_count + self.failed_count + self.unresolved_count + self.superseded_count
    }
}

/// A completed sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepRun {
    pub report: SweepReport,
    /// Orders the sweep confirmed that are ready to ship.
    pub handoffs: Vec<ShipmentHandoff>,
}

/// A completed sweep whose handoffs have been through the shipment trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShippedSweep {
    pub report: SweepReport,
    pub shipments: Vec<(OrderId, ShipmentOutcome)>,
}

/// What to do with one pending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    MarkPaid,
    MarkFailed,
    LeavePending,
}

/// Apply the decision table to one pending order.
#[must_use]
pub fn decide(
    session: Option<&CheckoutSession>,
    age: chrono::Duration,
    stale_after: chrono::Duration,
) -> SweepAction {
    match session.map(|s| s.payment_status) {
        None if age > stale_after => SweepAction::MarkFailed,
        None => SweepAction::LeavePending,
        Some(SessionPaymentStatus::Paid) => SweepAction::MarkPaid,
        Some(SessionPaymentStatus::Unpaid) => SweepAction::MarkFailed,
        Some(SessionPaymentStatus::NoPaymentRequired | SessionPaymentStatus::Other) => {
            SweepAction::LeavePending
        }
    }
}

enum Resolution {
    Fixed(Option<ShipmentHandoff>),
    Failed,
    Unresolved,
    /// Another writer resolved the order first.
    Superseded,
}

/// Converges stuck pending orders with the processor's record.
#[derive(Debug, Clone)]
pub struct DriftSweep<L, P> {
    ledger: L,
    processor: P,
    stale_after: chrono::Duration,
}

impl<L: OrderLedger, P: PaymentProcessor> DriftSweep<L, P> {
    #[must_use]
    pub const fn new(ledger: L, processor: P, stale_after: chrono::Duration) -> Self {
        Self {
            ledger,
            processor,
            stale_after,
        }
    }

    /// Sweep every pending order once.
    ///
    /// # Errors
    ///
    /// Returns an error only if the pending orders cannot be listed. Failures
    /// on individual orders count as unresolved.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepRun, RepositoryError> {
        let pending = self
            .ledger
            .list_by_payment_status(PaymentStatus::Pending)
            .await?;
        info!(pending = pending.len(), "Starting drift sweep");

        let resolutions: Vec<Resolution> = stream::iter(pending)
            .map(|order| self.resolve_one(order))
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        let mut run = SweepRun::default();
        for resolution in resolutions {
            match resolution {
                Resolution::Fixed(handoff) => {
                    run.report.fixed_count += 1;
                    run.handoffs.extend(handoff);
                }
                Resolution::Failed => run.report.failed_count += 1,
                Resolution::Unresolved => run.report.unresolved_count += 1,
                Resolution::Superseded => run.report.superseded_count += 1,
            }
        }

        info!(
            fixed = run.report.fixed_count,
            failed = run.report.failed_count,
            unresolved = run.report.unresolved_count,
            superseded = run.report.superseded_count,
            "Drift sweep finished"
        );
        Ok(run)
    }

    /// Sweep once, then run the shipment trigger for every confirmed order
    /// and wait for each attempt.
    ///
    /// # Errors
    ///
    /// Same as [`Self::sweep`]. Shipment failures are reported per order.
    pub async fn sweep_and_ship<S: ShippingProvider>(
        &self,
        trigger: &ShipmentTrigger<L, S>,
    ) -> Result<ShippedSweep, RepositoryError> {
        let run = self.sweep().await?;
        let mut shipments = Vec::with_capacity(run.handoffs.len());
        for handoff in &run.handoffs {
            let outcome = trigger.trigger(handoff).await;
            if !matches!(outcome, ShipmentOutcome::Created { .. }) {
                warn!(order_id = %handoff.order_id, ?outcome, "Shipment not created after sweep");
            }
            shipments.push((handoff.order_id, outcome));
        }
        Ok(ShippedSweep {
            report: run.report,
            shipments,
        })
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn resolve_one(&self, order: Order) -> Resolution {
        let session = match self
            .processor
            .find_session_for_order(order.id, order.created_at - SESSION_LOOKBACK)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Session lookup failed");
                return Resolution::Unresolved;
            }
        };

        let age = Utc::now() - order.created_at;
        let (patch, fixed) = match decide(session.as_ref(), age, self.stale_after) {
            SweepAction::LeavePending => return Resolution::Unresolved,
            SweepAction::MarkFailed => (OrderPatch::payment_failed(), false),
            SweepAction::MarkPaid => {
                let Some(session) = session else {
                    return Resolution::Unresolved;
                };
                let address = if order.shipping_address.is_some() {
                    None
                } else {
                    resolve_address(&session.address_candidates())
                };
                (
                    OrderPatch::paid(Some(session.id), session.payment_intent).with_address(address),
                    true,
                )
            }
        };

        match self
            .ledger
            .update(
                order.id,
                patch,
                UpdateGuard::PaymentStatusIs(PaymentStatus::Pending),
            )
            .await
        {
            Ok(UpdateOutcome::Applied(order)) if fixed => {
                info!("Sweep confirmed payment");
                Resolution::Fixed(handoff_for(&order))
            }
            Ok(UpdateOutcome::Applied(_)) => {
                info!("Sweep marked payment failed");
                Resolution::Failed
            }
            Ok(UpdateOutcome::Skipped(_)) | Err(RepositoryError::NotFound) => {
                Resolution::Superseded
            }
            Err(e) => {
                error!(error = %e, "Sweep update failed");
                Resolution::Unresolved
            }
        }
    }

    /// Run the sweep on an interval until the task is aborted.
    ///
    /// The first sweep runs one full interval after startup.
    pub fn spawn_periodic<S: ShippingProvider>(
        self,
        interval: Duration,
        trigger: ShipmentTrigger<L, S>,
    ) -> JoinHandle<()> {
        info!(interval_secs = interval.as_secs(), "Spawning drift sweep task");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep().await {
                    Ok(run) => {
                        for handoff in run.handoffs {
                            trigger.spawn(handoff);
                        }
                    }
                    Err(e) => error!(error = %e, "Drift sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(status: &str) -> CheckoutSession {
        serde_json::from_value(json!({"id": "cs_1", "payment_status": status})).unwrap()
    }

    const DAY: chrono::Duration = chrono::Duration::hours(24);

    #[test]
    fn test_no_session_stale() {
        assert_eq!(
            decide(None, chrono::Duration::hours(25), DAY),
            SweepAction::MarkFailed
        );
    }

    #[test]
    fn test_no_session_recent() {
        assert_eq!(
            decide(None, chrono::Duration::hours(2), DAY),
            SweepAction::LeavePending
        );
        // Exactly at the boundary is not yet stale.
        assert_eq!(decide(None, DAY, DAY), SweepAction::LeavePending);
    }

    #[test]
    fn test_paid_session_any_age() {
        for hours in [0, 48] {
            assert_eq!(
                decide(Some(&session("paid")), chrono::Duration::hours(hours), DAY),
                SweepAction::MarkPaid
            );
        }
    }

    #[test]
    fn test_unpaid_session() {
        assert_eq!(
            decide(Some(&session("unpaid")), chrono::Duration::minutes(10), DAY),
            SweepAction::MarkFailed
        );
    }

    #[test]
    fn test_other_session_status() {
        assert_eq!(
            decide(Some(&session("processing")), chrono::Duration::hours(30), DAY),
            SweepAction::LeavePending
        );
        assert_eq!(
            decide(Some(&session("no_payment_required")), DAY, DAY),
            SweepAction::LeavePending
        );
    }
}
