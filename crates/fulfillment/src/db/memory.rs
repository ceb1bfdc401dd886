//! In-memory order ledger.
//!
//! Same conditional-write semantics as [`super::PgOrderLedger`], with a single
//! mutex standing in for row locks. Used by tests and local development.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use sweetbox_core::order::{NewOrder, Order};
use sweetbox_core::{OrderId, PaymentStatus, ProductId};

use super::RepositoryError;
use super::ledger::{CreateOutcome, OrderLedger, OrderPatch, UpdateGuard, UpdateOutcome};

/// `HashMap`-backed ledger.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedger {
    data: Arc<Mutex<LedgerData>>,
}

#[derive(Debug, Default)]
struct LedgerData {
    next_id: i32,
    orders: BTreeMap<OrderId, Order>,
    inventory: HashMap<ProductId, i64>,
    processed_events: HashMap<String, ProcessedEvent>,
}

/// A recorded payment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEvent {
    pub event_type: String,
    pub order_id: Option<OrderId>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an order with an explicit creation time.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidOrder`] if the order total overflows.
    pub fn seed(&self, order: NewOrder, created_at: DateTime<Utc>) -> Result<Order, RepositoryError> {
        let mut data = self.lock();
        data.insert(order, created_at)
    }

    /// Set stock on hand for a product.
    pub fn set_stock(&self, product_id: ProductId, quantity: i64) {
        self.lock().inventory.insert(product_id, quantity);
    }

    /// Stock on hand for a product, if tracked.
    #[must_use]
    pub fn stock(&self, product_id: ProductId) -> Option<i64> {
        self.lock().inventory.get(&product_id).copied()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }

    /// All stored orders.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.values().cloned().collect()
    }

    /// The record for a processed event id.
    #[must_use]
    pub fn processed_event(&self, event_id: &str) -> Option<ProcessedEvent> {
        self.lock().processed_events.get(event_id).cloned()
    }
}

impl LedgerData {
    fn insert(&mut self, new: NewOrder, created_at: DateTime<Utc>) -> Result<Order, RepositoryError> {
        let total = new
            .total()
            .ok_or_else(|| RepositoryError::InvalidOrder("order total overflows".to_string()))?;
        self.next_id += 1;
        let order = Order {
            id: OrderId::new(self.next_id),
            user_id: new.user_id,
            total,
            items: new.items,
            shipping_address: new.shipping_address,
            notes: new.notes,
            status: new.status,
            payment_status: new.payment_status,
            shipment_id: None,
            checkout_session_id: new.checkout_session_id,
            payment_reference: new.payment_reference,
            created_at,
            updated_at: created_at,
        };
        if order.is_paid() {
            self.decrement_inventory(&order);
        }
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    fn decrement_inventory(&mut self, order: &Order) {
        for item in &order.items {
            if let Some(stock) = self.inventory.get_mut(&item.product_id) {
                *stock -= i64::from(item.quantity);
            }
        }
    }
}

impl OrderLedger for InMemoryLedger {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.lock().orders.get(&id).cloned())
    }

    async fn create(&self, order: NewOrder) -> Result<CreateOutcome, RepositoryError> {
        let mut data = self.lock();

        if let Some(session_id) = order.checkout_session_id.as_deref()
            && let Some(existing) = data
                .orders
                .values()
                .find(|o| o.checkout_session_id.as_deref() == Some(session_id))
        {
            return Ok(CreateOutcome::AlreadyExists(existing.clone()));
        }

        Ok(CreateOutcome::Created(data.insert(order, Utc::now())?))
    }

    async fn update(
        &self,
        id: OrderId,
        patch: OrderPatch,
        guard: UpdateGuard,
    ) -> Result<UpdateOutcome, RepositoryError> {
        let mut data = self.lock();

        let mut order = data
            .orders
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        if !guard.allows(&order) {
            return Ok(UpdateOutcome::Skipped(order));
        }

        if let Some(session_id) = patch.checkout_session_id.as_deref()
            && order.checkout_session_id.is_none()
            && data
                .orders
                .values()
                .any(|o| o.id != id && o.checkout_session_id.as_deref() == Some(session_id))
        {
            return Err(RepositoryError::Conflict(format!(
                "checkout session {session_id} already belongs to another order"
            )));
        }

        if patch.apply(&mut order, Utc::now()) {
            data.decrement_inventory(&order);
        }
        data.orders.insert(id, order.clone());
        Ok(UpdateOutcome::Applied(order))
    }

    async fn list_by_payment_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|o| o.payment_status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        Ok(orders)
    }

    async fn has_processed_event(&self, event_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.lock().processed_events.contains_key(event_id))
    }

    async fn record_processed_event(
        &self,
        event_id: &str,
        event_type: &str,
        order_id: Option<OrderId>,
    ) -> Result<bool, RepositoryError> {
        let mut data = self.lock();
        if data.processed_events.contains_key(event_id) {
            return Ok(false);
        }
        data.processed_events.insert(
            event_id.to_string(),
            ProcessedEvent {
                event_type: event_type.to_string(),
                order_id,
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use sweetbox_core::OrderStatus;
    use sweetbox_core::order::LineItem;

    fn items() -> Vec<LineItem> {
        vec![LineItem::new(
            ProductId::new(7),
            3,
            Decimal::new(400, 2),
            vec![],
            None,
        )
        .unwrap()]
    }

    #[tokio::test]
    async fn test_create_is_unique_per_checkout_session() {
        let ledger = InMemoryLedger::new();
        let first = ledger
            .create(NewOrder::paid_from_checkout(None, items(), "cs_1".to_string()))
            .await
            .unwrap();
        let second = ledger
            .create(NewOrder::paid_from_checkout(None, items(), "cs_1".to_string()))
            .await
            .unwrap();

        assert!(matches!(first, CreateOutcome::Created(_)));
        assert!(matches!(second, CreateOutcome::AlreadyExists(_)));
        assert_eq!(ledger.order_count(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_overflowing_total() {
        let ledger = InMemoryLedger::new();
        let items = vec![
            LineItem::new(ProductId::new(1), 1, Decimal::MAX, vec![], None).unwrap(),
            LineItem::new(ProductId::new(2), 1, Decimal::ONE, vec![], None).unwrap(),
        ];

        let result = ledger
            .create(NewOrder::paid_from_checkout(None, items, "cs_1".to_string()))
            .await;

        assert!(matches!(result, Err(RepositoryError::InvalidOrder(_))));
        assert_eq!(ledger.order_count(), 0);
    }

    #[tokio::test]
    async fn test_paid_create_decrements_inventory_once() {
        let ledger = InMemoryLedger::new();
        ledger.set_stock(ProductId::new(7), 10);

        for _ in 0..2 {
            ledger
                .create(NewOrder::paid_from_checkout(None, items(), "cs_1".to_string()))
                .await
                .unwrap();
        }

        assert_eq!(ledger.stock(ProductId::new(7)), Some(7));
    }

    #[tokio::test]
    async fn test_update_decrements_inventory_on_transition_only() {
        let ledger = InMemoryLedger::new();
        ledger.set_stock(ProductId::new(7), 10);
        let order = ledger.seed(NewOrder::pending(None, items()), Utc::now()).unwrap();

        for _ in 0..2 {
            ledger
                .update(order.id, OrderPatch::paid(None, None), UpdateGuard::Always)
                .await
                .unwrap();
        }

        assert_eq!(ledger.stock(ProductId::new(7)), Some(7));
    }

    #[tokio::test]
    async fn test_update_respects_guard() {
        let ledger = InMemoryLedger::new();
        let order = ledger.seed(NewOrder::pending(None, items()), Utc::now()).unwrap();
        ledger
            .update(order.id, OrderPatch::paid(None, None), UpdateGuard::Always)
            .await
            .unwrap();

        let outcome = ledger
            .update(
                order.id,
                OrderPatch::payment_failed(),
                UpdateGuard::PaymentStatusNot(PaymentStatus::Paid),
            )
            .await
            .unwrap();

        let UpdateOutcome::Skipped(order) = outcome else {
            panic!("expected skip");
        };
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_update_missing_order() {
        let ledger = InMemoryLedger::new();
        let err = ledger
            .update(OrderId::new(99), OrderPatch::payment_failed(), UpdateGuard::Always)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_processed_events_record_once() {
        let ledger = InMemoryLedger::new();
        assert!(!ledger.has_processed_event("evt_1").await.unwrap());
        assert!(
            ledger
                .record_processed_event("evt_1", "charge.updated", None)
                .await
                .unwrap()
        );
        assert!(
            !ledger
                .record_processed_event("evt_1", "charge.updated", None)
                .await
                .unwrap()
        );
        assert!(ledger.has_processed_event("evt_1").await.unwrap());
        assert_eq!(
            ledger.processed_event("evt_1"),
            Some(ProcessedEvent {
                event_type: "charge.updated".to_string(),
                order_id: None,
            })
        );
    }
}
