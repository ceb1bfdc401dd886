//! Order ledger interface.
//!
//! The ledger is the only writer of order state. Every mutation goes through
//! [`OrderLedger::update`] with an [`UpdateGuard`] that is evaluated against
//! the row as it exists inside the write, so concurrent webhook deliveries and
//! the drift sweep can never overwrite each other's transitions.

use std::future::Future;

use chrono::{DateTime, Utc};
use sweetbox_core::address::CanonicalAddress;
use sweetbox_core::order::{NewOrder, Order};
use sweetbox_core::{OrderId, OrderStatus, PaymentStatus};

use super::RepositoryError;

/// Authoritative store of order lifecycle and payment status.
pub trait OrderLedger: Clone + Send + Sync + 'static {
    /// Check that the backing store is reachable.
    fn ping(&self) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Load an order with its line items.
    fn get(&self, id: OrderId)
    -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Insert an order and its line items in one transaction.
    ///
    /// At most one order exists per checkout session id: a second insert for
    /// the same session returns [`CreateOutcome::AlreadyExists`] with the
    /// order the first writer created. Inventory is decremented when the
    /// order is inserted already paid.
    fn create(
        &self,
        order: NewOrder,
    ) -> impl Future<Output = Result<CreateOutcome, RepositoryError>> + Send;

    /// Atomically apply `patch` if `guard` holds for the current row.
    ///
    /// Inventory is decremented in the same write when the patch moves the
    /// order to paid.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the order does not exist.
    fn update(
        &self,
        id: OrderId,
        patch: OrderPatch,
        guard: UpdateGuard,
    ) -> impl Future<Output = Result<UpdateOutcome, RepositoryError>> + Send;

    /// All orders with the given payment status, oldest first.
    fn list_by_payment_status(
        &self,
        status: PaymentStatus,
    ) -> impl Future<Output = Result<Vec<Order>, RepositoryError>> + Send;

    /// Whether a payment event id has already been reconciled.
    fn has_processed_event(
        &self,
        event_id: &str,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Record a reconciled payment event. Returns `false` if it was already recorded.
    fn record_processed_event(
        &self,
        event_id: &str,
        event_type: &str,
        order_id: Option<OrderId>,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;
}

/// Result of [`OrderLedger::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// This call inserted the order.
    Created(Order),
    /// An order for the same checkout session already existed.
    AlreadyExists(Order),
}

impl CreateOutcome {
    /// The stored order, whoever created it.
    #[must_use]
    pub fn into_order(self) -> Order {
        match self {
            Self::Created(order) | Self::AlreadyExists(order) => order,
        }
    }
}

/// Result of [`OrderLedger::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The guard held and the patch was written.
    Applied(Order),
    /// The guard failed; the order is returned unchanged.
    Skipped(Order),
}

impl UpdateOutcome {
    /// The order as it stands after the call.
    #[must_use]
    pub fn into_order(self) -> Order {
        match self {
            Self::Applied(order) | Self::Skipped(order) => order,
        }
    }
}

/// Condition the current row must meet for an update to apply.
///
/// The payment status guards never hold for a cancelled order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateGuard {
    Always,
    PaymentStatusIs(PaymentStatus),
    PaymentStatusNot(PaymentStatus),
    ShipmentUnset,
}

impl UpdateGuard {
    /// Whether the guard holds for `order`.
    #[must_use]
    pub fn allows(&self, order: &Order) -> bool {
        match self {
            Self::Always => true,
            Self::PaymentStatusIs(status) => {
                order.status != OrderStatus::Cancelled && order.payment_status == *status
            }
            Self::PaymentStatusNot(status) => {
                order.status != OrderStatus::Cancelled && order.payment_status != *status
            }
            Self::ShipmentUnset => order.shipment_id.is_none(),
        }
    }
}

/// Partial order update.
///
/// `shipping_address`, `shipment_id`, `checkout_session_id` and
/// `payment_reference` only fill empty fields; an existing value is never
/// replaced or cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub shipping_address: Option<CanonicalAddress>,
    pub shipment_id: Option<String>,
    pub checkout_session_id: Option<String>,
    pub payment_reference: Option<String>,
}

impl OrderPatch {
    /// Confirm payment.
    #[must_use]
    pub const fn paid(checkout_session_id: Option<String>, payment_reference: Option<String>) -> Self {
        Self {
            status: Some(OrderStatus::Confirmed),
            payment_status: Some(PaymentStatus::Paid),
            shipping_address: None,
            shipment_id: None,
            checkout_session_id,
            payment_reference,
        }
    }

    /// Record a failed payment. Lifecycle status is left alone.
    #[must_use]
    pub fn payment_failed() -> Self {
        Self {
            payment_status: Some(PaymentStatus::Failed),
            ..Self::default()
        }
    }

    /// Attach the external shipment reference.
    #[must_use]
    pub fn shipment(shipment_id: String) -> Self {
        Self {
            shipment_id: Some(shipment_id),
            ..Self::default()
        }
    }

    /// Offer an address for orders that do not have one yet.
    #[must_use]
    pub fn with_address(mut self, address: Option<CanonicalAddress>) -> Self {
        self.shipping_address = address;
        self
    }

    /// Apply the patch to `order` in place.
    ///
    /// Returns `true` if this moved the order into `paid`.
    pub fn apply(&self, order: &mut Order, now: DateTime<Utc>) -> bool {
        let was_paid = order.is_paid();

        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(payment_status) = self.payment_status {
            order.payment_status = payment_status;
        }
        if order.is_paid() {
            order.status = OrderStatus::Confirmed;
        }

        fill(&mut order.shipping_address, self.shipping_address.as_ref());
        fill(&mut order.shipment_id, self.shipment_id.as_ref());
        fill(&mut order.checkout_session_id, self.checkout_session_id.as_ref());
        fill(&mut order.payment_reference, self.payment_reference.as_ref());

        order.updated_at = now;
        !was_paid && order.is_paid()
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, value: Option<&T>) {
    if slot.is_none() {
        *slot = value.cloned();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn order(payment_status: PaymentStatus) -> Order {
        Order {
            id: OrderId::new(1),
            user_id: None,
            total: Decimal::new(1000, 2),
            items: vec![],
            shipping_address: None,
            notes: None,
            status: if payment_status == PaymentStatus::Paid {
                OrderStatus::Confirmed
            } else {
                OrderStatus::PendingPayment
            },
            payment_status,
            shipment_id: None,
            checkout_session_id: None,
            payment_reference: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn address(street: &str) -> CanonicalAddress {
        CanonicalAddress {
            name: None,
            email: None,
            phone: None,
            street1: street.to_string(),
            street2: None,
            city: "Portland".to_string(),
            state: "OR".to_string(),
            postal_code: "97201".to_string(),
            country: "US".to_string(),
        }
    }

    #[test]
    fn test_paid_patch_confirms_and_reports_transition() {
        let mut order = order(PaymentStatus::Pending);
        let became_paid = OrderPatch::paid(Some("cs_1".to_string()), Some("pi_1".to_string()))
            .apply(&mut order, Utc::now());

        assert!(became_paid);
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.checkout_session_id.as_deref(), Some("cs_1"));
    }

    #[test]
    fn test_repeat_paid_patch_is_not_a_transition() {
        let mut order = order(PaymentStatus::Paid);
        assert!(!OrderPatch::paid(None, None).apply(&mut order, Utc::now()));
    }

    #[test]
    fn test_failed_patch_leaves_lifecycle_status() {
        let mut order = order(PaymentStatus::Pending);
        OrderPatch::payment_failed().apply(&mut order, Utc::now());
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        assert_eq!(order.status, OrderStatus::PendingPayment);
    }

    #[test]
    fn test_set_once_fields_are_never_replaced() {
        let mut order = order(PaymentStatus::Paid);
        order.shipment_id = Some("shp_first".to_string());
        order.shipping_address = Some(address("1 First St"));

        OrderPatch::shipment("shp_second".to_string())
            .with_address(Some(address("2 Second St")))
            .apply(&mut order, Utc::now());

        assert_eq!(order.shipment_id.as_deref(), Some("shp_first"));
        assert_eq!(order.shipping_address.unwrap().street1, "1 First St");
    }

    #[test]
    fn test_guards() {
        let pending = order(PaymentStatus::Pending);
        let paid = order(PaymentStatus::Paid);

        assert!(UpdateGuard::Always.allows(&paid));
        assert!(UpdateGuard::PaymentStatusIs(PaymentStatus::Pending).allows(&pending));
        assert!(!UpdateGuard::PaymentStatusIs(PaymentStatus::Pending).allows(&paid));
        assert!(!UpdateGuard::PaymentStatusNot(PaymentStatus::Paid).allows(&paid));
        assert!(UpdateGuard::ShipmentUnset.allows(&paid));
    }

    #[test]
    fn test_payment_guards_refuse_cancelled_orders() {
        let mut cancelled = order(PaymentStatus::Pending);
        cancelled.status = OrderStatus::Cancelled;

        assert!(!UpdateGuard::PaymentStatusIs(PaymentStatus::Pending).allows(&cancelled));
        assert!(!UpdateGuard::PaymentStatusNot(PaymentStatus::Paid).allows(&cancelled));
        assert!(UpdateGuard::Always.allows(&cancelled));
    }
}
