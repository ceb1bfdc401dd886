//! Drift sweep tests against the in-memory ledger and fake processor.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sweetbox_core::order::{LineItem, NewOrder};
use sweetbox_core::{OrderId, OrderStatus, PaymentStatus, ProductId};
use sweetbox_fulfillment::db::{InMemoryLedger, OrderLedger, OrderPatch, UpdateGuard};
use sweetbox_fulfillment::payments::{
    CheckoutSession, CheckoutSessionRequest, PaymentError, PaymentProcessor,
};
use sweetbox_fulfillment::services::{DriftSweep, ShipmentOutcome, SweepReport};
use sweetbox_integration_tests::{FakeProcessor, TestApp, checkout_session, paid_session};

fn pending() -> NewOrder {
    NewOrder::pending(
        None,
        vec![LineItem::new(
            ProductId::new(2),
            1,
            Decimal::new(1800, 2),
            vec![],
            None,
        )
        .unwrap()],
    )
}

#[tokio::test]
async fn test_sweep_resolves_stale_paid_and_unpaid_orders() {
    let app = TestApp::new();
    let now = Utc::now();

    let stale = app.ledger.seed(pending(), now - Duration::hours(25)).unwrap();
    let paid = app.ledger.seed(pending(), now - Duration::hours(1)).unwrap();
    let unpaid = app.ledger.seed(pending(), now - Duration::hours(1)).unwrap();

    app.processor
        .add_session(checkout_session(paid_session("cs_paid", paid.id, "pi_paid")));
    app.processor.add_session(checkout_session(json!({
        "id": "cs_unpaid",
        "payment_status": "unpaid",
        "metadata": {"order_id": unpaid.id.to_string()},
        "created": now.timestamp(),
    })));

    let run = app.state.sweep().sweep().await.unwrap();
    assert_eq!(
        run.report,
        SweepReport {
            fixed_count: 1,
            failed_count: 2,
            unresolved_count: 0,
            superseded_count: 0,
        }
    );
    assert_eq!(run.handoffs.len(), 1);
    assert_eq!(run.handoffs[0].order_id, paid.id);

    let paid = app.ledger.get(paid.id).await.unwrap().unwrap();
    assert_eq!(paid.status, OrderStatus::Confirmed);
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.payment_reference.as_deref(), Some("pi_paid"));
    assert!(paid.shipping_address.is_some());

    for id in [stale.id, unpaid.id] {
        let order = app.ledger.get(id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Failed);
    }

    // Nothing pending is left, so a second sweep is empty.
    let again = app.state.sweep().sweep().await.unwrap();
    assert_eq!(again.report, SweepReport::default());
}

#[tokio::test]
async fn test_recent_order_without_session_stays_pending() {
    let app = TestApp::new();
    let order = app.ledger.seed(pending(), Utc::now() - Duration::hours(2)).unwrap();

    let run = app.state.sweep().sweep().await.unwrap();
    assert_eq!(run.report.unresolved_count, 1);

    let stored = app.ledger.get(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_processor_errors_leave_orders_unresolved() {
    let app = TestApp::new();
    app.ledger.seed(pending(), Utc::now() - Duration::hours(48)).unwrap();
    app.processor.fail_lookups();

    let run = app.state.sweep().sweep().await.unwrap();
    assert_eq!(
        run.report,
        SweepReport {
            fixed_count: 0,
            failed_count: 0,
            unresolved_count: 1,
            superseded_count: 0,
        }
    );
}

#[tokio::test]
async fn test_sessions_before_the_order_are_not_matched() {
    let app = TestApp::new();
    let now = Utc::now();
    let order = app.ledger.seed(pending(), now - Duration::hours(1)).unwrap();

    // A paid session from well before the order was written.
    let mut old = paid_session("cs_old", order.id, "pi_old");
    old["created"] = json!((now - Duration::hours(3)).timestamp());
    app.processor.add_session(checkout_session(old));

    let run = app.state.sweep().sweep().await.unwrap();
    assert_eq!(run.report.unresolved_count, 1);
    assert!(!app.ledger.get(order.id).await.unwrap().unwrap().is_paid());
}

#[tokio::test]
async fn test_sweep_and_ship_ships_confirmed_orders() {
    let app = TestApp::new();
    let order = app
        .ledger
        .seed(pending(), Utc::now() - Duration::hours(1))
        .unwrap();
    app.processor
        .add_session(checkout_session(paid_session("cs_paid", order.id, "pi_paid")));

    let shipped = app
        .state
        .sweep()
        .sweep_and_ship(app.state.trigger())
        .await
        .unwrap();

    assert_eq!(shipped.report.fixed_count, 1);
    assert_eq!(shipped.shipments.len(), 1);
    assert_eq!(shipped.shipments[0].0, order.id);
    assert!(matches!(
        shipped.shipments[0].1,
        ShipmentOutcome::Created { .. }
    ));
    assert_eq!(app.shipping.shipments().len(), 1);

    let stored = app.ledger.get(order.id).await.unwrap().unwrap();
    assert!(stored.has_shipment());
}

/// Confirms the order through the ledger just before answering a lookup,
/// as a webhook landing mid-sweep would.
#[derive(Clone)]
struct WebhookWins {
    inner: FakeProcessor,
    ledger: InMemoryLedger,
}

impl PaymentProcessor for WebhookWins {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        self.inner.create_checkout_session(request).await
    }

    async fn find_session_by_payment_intent(
        &self,
        payment_intent: &str,
    ) -> Result<Option<CheckoutSession>, PaymentError> {
        self.inner.find_session_by_payment_intent(payment_intent).await
    }

    async fn find_session_for_order(
        &self,
        order_id: OrderId,
        created_after: DateTime<Utc>,
    ) -> Result<Option<CheckoutSession>, PaymentError> {
        self.ledger
            .update(order_id, OrderPatch::paid(None, None), UpdateGuard::Always)
            .await
            .unwrap();
        self.inner.find_session_for_order(order_id, created_after).await
    }
}

#[tokio::test]
async fn test_orders_resolved_elsewhere_count_as_superseded() {
    let ledger = InMemoryLedger::new();
    let processor = FakeProcessor::new();
    let order = ledger.seed(pending(), Utc::now() - Duration::hours(1)).unwrap();
    processor.add_session(checkout_session(paid_session("cs_paid", order.id, "pi_paid")));

    let racing = WebhookWins {
        inner: processor,
        ledger: ledger.clone(),
    };
    let run = DriftSweep::new(ledger, racing, Duration::hours(24))
        .sweep()
        .await
        .unwrap();

    assert_eq!(run.report.superseded_count, 1);
    assert_eq!(run.report.fixed_count, 0);
    assert_eq!(run.report.scanned(), 1);
    assert!(run.handoffs.is_empty());
}
