//! Payment event reconciliation.
//!
//! Drives orders from `pending_payment/pending` to `confirmed/paid` or
//! `pending_payment/failed` from verified processor events. Every transition
//! is a guarded ledger write evaluated against the stored row, so duplicate
//! and reordered deliveries converge on the same state:
//!
//! - an order already paid is never confirmed twice
//! - a deferred order is created at most once per checkout session
//! - shipment is handed off only by the write that actually confirmed payment

use sweetbox_core::OrderId;
use sweetbox_core::address::{self, AddressCandidate, CanonicalAddress};
use sweetbox_core::intent::{CheckoutIntent, CompactOrder, PayloadError, metadata_keys};
use sweetbox_core::order::{NewOrder, Order};
use sweetbox_core::{OrderStatus, PaymentStatus, UserId};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::shipment::ShipmentHandoff;
use crate::db::{CreateOutcome, OrderLedger, OrderPatch, RepositoryError, UpdateGuard, UpdateOutcome};
use crate::payments::types::{Charge, PaymentIntent};
use crate::payments::{CheckoutSession, EventKind, PaymentError, PaymentEvent, PaymentProcessor};

/// Errors that fail a webhook delivery.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The event references an order the ledger does not have.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// Ledger read or write failed; the processor should redeliver.
    #[error("ledger error: {0}")]
    Ledger(#[from] RepositoryError),

    /// Checkout metadata on the event could not be decoded.
    #[error("invalid checkout metadata: {0}")]
    Payload(#[from] PayloadError),

    /// Looking up the originating session failed.
    #[error("payment processor error: {0}")]
    Processor(#[from] PaymentError),
}

/// What reconciling one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// An existing order moved to `confirmed/paid`.
    Confirmed(OrderId),
    /// A deferred order was materialized already paid.
    Created(OrderId),
    /// The order was already paid; nothing changed.
    AlreadyPaid(OrderId),
    /// The deferred order for this session was created by an earlier delivery.
    AlreadyCreated(OrderId),
    /// An order's payment status moved to `failed`.
    PaymentFailed(OrderId),
    /// The order was cancelled; payment events no longer move it.
    OrderCancelled(OrderId),
    /// A payment failed before any order existed.
    FailedWithoutOrder,
    /// The session has not been paid yet.
    NotPaidYet,
    /// No checkout session matches the charge yet.
    SessionNotFound,
    /// This event id was reconciled before.
    DuplicateEvent,
    /// Not an event this engine acts on.
    Ignored,
}

impl ReconcileOutcome {
    /// The order the event resolved to, if any.
    #[must_use]
    pub const fn order_id(&self) -> Option<OrderId> {
        match self {
            Self::Confirmed(id)
            | Self::Created(id)
            | Self::AlreadyPaid(id)
            | Self::AlreadyCreated(id)
            | Self::PaymentFailed(id)
            | Self::OrderCancelled(id) => Some(*id),
            _ => None,
        }
    }
}

/// Result of [`ReconciliationEngine::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub outcome: ReconcileOutcome,
    /// Set only when this call confirmed payment for an order that has an
    /// address and no shipment.
    pub handoff: Option<ShipmentHandoff>,
}

impl Reconciliation {
    const fn without_handoff(outcome: ReconcileOutcome) -> Self {
        Self {
            outcome,
            handoff: None,
        }
    }
}

/// Applies verified payment events to the order ledger.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine<L, P> {
    ledger: L,
    processor: P,
}

impl<L: OrderLedger, P: PaymentProcessor> ReconciliationEngine<L, P> {
    #[must_use]
    pub const fn new(ledger: L, processor: P) -> Self {
        Self { ledger, processor }
    }

    /// Reconcile one verified event.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the delivery should fail: unknown
    /// order, unreadable metadata, or a ledger/processor failure that a
    /// redelivery may fix.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle(&self, event: PaymentEvent) -> Result<Reconciliation, ReconcileError> {
        if self.ledger.has_processed_event(&event.id).await? {
            info!("Event already reconciled");
            return Ok(Reconciliation::without_handoff(
                ReconcileOutcome::DuplicateEvent,
            ));
        }

        let result = match &event.kind {
            EventKind::SessionCompleted(session) => self.session_completed(session).await?,
            EventKind::ChargeUpdated(charge) => self.charge_updated(charge).await?,
            EventKind::PaymentFailed(intent) => self.payment_failed(intent).await?,
            EventKind::Other => {
                debug!("Ignoring event type");
                Reconciliation::without_handoff(ReconcileOutcome::Ignored)
            }
        };

        // The ledger write already happened; losing the record only costs a
        // slower duplicate path later.
        if let Err(e) = self
            .ledger
            .record_processed_event(&event.id, &event.event_type, result.outcome.order_id())
            .await
        {
            warn!(error = %e, "Failed to record processed event");
        }

        info!(outcome = ?result.outcome, "Event reconciled");
        Ok(result)
    }

    async fn session_completed(
        &self,
        session: &CheckoutSession,
    ) -> Result<Reconciliation, ReconcileError> {
        if !session.is_paid() {
            info!(session_id = %session.id, "Session completed without payment");
            return Ok(Reconciliation::without_handoff(ReconcileOutcome::NotPaidYet));
        }

        let Some(returned) = CheckoutIntent::from_metadata(&session.metadata)? else {
            warn!(session_id = %session.id, "Paid session carries no checkout intent");
            return Ok(Reconciliation::without_handoff(ReconcileOutcome::Ignored));
        };

        match returned.intent {
            CheckoutIntent::Existing { order_id } => self.confirm_existing(order_id, session).await,
            CheckoutIntent::Deferred { order } => {
                self.create_deferred(order, returned.owner, session).await
            }
        }
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn confirm_existing(
        &self,
        order_id: OrderId,
        session: &CheckoutSession,
    ) -> Result<Reconciliation, ReconcileError> {
        let order = self
            .ledger
            .get(order_id)
            .await?
            .ok_or(ReconcileError::OrderNotFound(order_id))?;

        if order.is_paid() {
            info!("Order already paid");
            return Ok(Reconciliation::without_handoff(
                ReconcileOutcome::AlreadyPaid(order_id),
            ));
        }
        if order.status == OrderStatus::Cancelled {
            return Ok(cancelled(order_id));
        }

        // Never replace an address the order already carries.
        let address = if order.shipping_address.is_some() {
            None
        } else {
            resolve_address(&session.address_candidates())
        };

        let patch = OrderPatch::paid(Some(session.id.clone()), session.payment_intent.clone())
            .with_address(address);

        let order = match self
            .ledger
            .update(
                order_id,
                patch,
                UpdateGuard::PaymentStatusNot(PaymentStatus::Paid),
            )
            .await
        {
            Ok(UpdateOutcome::Applied(order)) => order,
            Ok(UpdateOutcome::Skipped(order)) if order.status == OrderStatus::Cancelled => {
                return Ok(cancelled(order_id));
            }
            Ok(UpdateOutcome::Skipped(_)) => {
                info!("Order paid by a concurrent delivery");
                return Ok(Reconciliation::without_handoff(
                    ReconcileOutcome::AlreadyPaid(order_id),
                ));
            }
            Err(RepositoryError::NotFound) => return Err(ReconcileError::OrderNotFound(order_id)),
            Err(e) => return Err(e.into()),
        };

        check_amount(&order, session);
        info!("Order confirmed");

        Ok(Reconciliation {
            outcome: ReconcileOutcome::Confirmed(order_id),
            handoff: handoff_for(&order),
        })
    }

    #[instrument(skip(self, order, session, owner), fields(session_id = %session.id, owner = ?owner))]
    async fn create_deferred(
        &self,
        order: CompactOrder,
        owner: Option<UserId>,
        session: &CheckoutSession,
    ) -> Result<Reconciliation, ReconcileError> {
        // Ownership comes only from the id stamped at session creation; the
        // payer's email is never matched against accounts.
        let mut candidates = session.address_candidates();
        candidates.extend(order.address);

        let mut new_order =
            NewOrder::paid_from_checkout(owner, order.items, session.id.clone());
        new_order.shipping_address = resolve_address(&candidates);
        new_order.notes = order.notes;
        new_order.payment_reference.clone_from(&session.payment_intent);

        match self.ledger.create(new_order).await? {
            CreateOutcome::Created(order) => {
                check_amount(&order, session);
                info!(order_id = %order.id, "Deferred order created");
                Ok(Reconciliation {
                    outcome: ReconcileOutcome::Created(order.id),
                    handoff: handoff_for(&order),
                })
            }
            CreateOutcome::AlreadyExists(order) => {
                info!(order_id = %order.id, "Deferred order already created for session");
                Ok(Reconciliation::without_handoff(
                    ReconcileOutcome::AlreadyCreated(order.id),
                ))
            }
        }
    }

    async fn charge_updated(&self, charge: &Charge) -> Result<Reconciliation, ReconcileError> {
        let Some(payment_intent) = charge.payment_intent.as_deref() else {
            debug!(charge_id = %charge.id, "Charge has no payment intent");
            return Ok(Reconciliation::without_handoff(ReconcileOutcome::Ignored));
        };

        match self
            .processor
            .find_session_by_payment_intent(payment_intent)
            .await?
        {
            Some(session) => self.session_completed(&session).await,
            None => {
                // Sessions can lag behind charge events on the processor side.
                info!(payment_intent, "No checkout session for charge yet");
                Ok(Reconciliation::without_handoff(
                    ReconcileOutcome::SessionNotFound,
                ))
            }
        }
    }

    async fn payment_failed(
        &self,
        intent: &PaymentIntent,
    ) -> Result<Reconciliation, ReconcileError> {
        let Some(raw) = intent.metadata.get(metadata_keys::ORDER_ID) else {
            info!(payment_intent = %intent.id, "Payment failed before any order existed");
            return Ok(Reconciliation::without_handoff(
                ReconcileOutcome::FailedWithoutOrder,
            ));
        };
        let order_id: OrderId = raw
            .parse()
            .map_err(|e| PayloadError::Malformed(format!("order_id: {e}")))?;

        let reason = intent
            .last_payment_error
            .as_ref()
            .and_then(|e| e.message.as_deref())
            .unwrap_or("unknown");

        match self
            .ledger
            .update(
                order_id,
                OrderPatch::payment_failed(),
                UpdateGuard::PaymentStatusNot(PaymentStatus::Paid),
            )
            .await
        {
            Ok(UpdateOutcome::Applied(_)) => {
                info!(%order_id, reason, "Payment failed for order");
                Ok(Reconciliation::without_handoff(
                    ReconcileOutcome::PaymentFailed(order_id),
                ))
            }
            Ok(UpdateOutcome::Skipped(order)) if order.status == OrderStatus::Cancelled => {
                Ok(cancelled(order_id))
            }
            Ok(UpdateOutcome::Skipped(_)) => {
                info!(%order_id, "Ignoring failed retry for a paid order");
                Ok(Reconciliation::without_handoff(
                    ReconcileOutcome::AlreadyPaid(order_id),
                ))
            }
            Err(RepositoryError::NotFound) => Err(ReconcileError::OrderNotFound(order_id)),
            Err(e) => Err(e.into()),
        }
    }
}

fn cancelled(order_id: OrderId) -> Reconciliation {
    warn!(%order_id, "Ignoring payment event for a cancelled order");
    Reconciliation::without_handoff(ReconcileOutcome::OrderCancelled(order_id))
}

/// Resolve an address, logging instead of failing.
///
/// An incomplete address never blocks payment confirmation.
pub(crate) fn resolve_address(candidates: &[AddressCandidate]) -> Option<CanonicalAddress> {
    match address::resolve(candidates) {
        Ok(address) => Some(address),
        Err(e) => {
            warn!(error = %e, "No complete shipping address");
            None
        }
    }
}

pub(crate) fn handoff_for(order: &Order) -> Option<ShipmentHandoff> {
    if order.has_shipment() {
        return None;
    }
    match &order.shipping_address {
        Some(address) => Some(ShipmentHandoff {
            order_id: order.id,
            address: address.clone(),
        }),
        None => {
            warn!(order_id = %order.id, "Paid order has no address; shipment needs manual handling");
            None
        }
    }
}

fn check_amount(order: &Order, session: &CheckoutSession) {
    if let Some(amount) = session.amount_total()
        && amount != order.total
    {
        warn!(
            order_id = %order.id,
            ledger_total = %order.total,
            processor_total = %amount,
            "Processor amount differs from order total"
        );
    }
}
