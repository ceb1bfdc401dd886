//! HTTP-level tests for the fulfillment router.
//!
//! Requests go through the full middleware stack via `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use sweetbox_core::order::{LineItem, NewOrder};
use sweetbox_core::{OrderId, PaymentStatus, ProductId, UserId};
use sweetbox_fulfillment::db::OrderLedger;
use sweetbox_fulfillment::models::CurrentUser;
use sweetbox_fulfillment::payments::events::SESSION_COMPLETED;
use sweetbox_fulfillment::payments::webhook::{SIGNATURE_HEADER, signature_header};
use sweetbox_fulfillment::state::AppOptions;
use sweetbox_integration_tests::{
    ADMIN_TOKEN, TestApp, checkout_session, event_envelope, json_body, paid_session, settle,
    signed_body, test_options,
};
use tower::ServiceExt;

fn customer() -> CurrentUser {
    CurrentUser {
        id: UserId::new(7),
        email: "ana@example.com".to_string(),
    }
}

fn items() -> Vec<LineItem> {
    vec![LineItem::new(
        ProductId::new(4),
        2,
        Decimal::new(1500, 2),
        vec![],
        None,
    )
    .unwrap()]
}

fn webhook_request(body: Vec<u8>, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::post("/webhooks/payments").header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body)).unwrap()
}

fn checkout_request(cookie: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder =
        Request::post("/api/checkout/session").header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn cart() -> Value {
    json!([{"name": "Truffle Box", "unit_price": "15.00", "quantity": 2}])
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new();
    for uri in ["/health", "/health/ready"] {
        let response = app
            .router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
}

// =============================================================================
// Webhooks
// =============================================================================

#[tokio::test]
async fn test_signed_webhook_confirms_order_and_ships() {
    let app = TestApp::new();
    let order = app
        .ledger
        .seed(NewOrder::pending(Some(customer().id), items()), chrono::Utc::now())
        .unwrap();
    let (body, signature) = signed_body(&event_envelope(
        "evt_http_1",
        SESSION_COMPLETED,
        paid_session("cs_http", order.id, "pi_http"),
    ));

    let response = app
        .router()
        .oneshot(webhook_request(body, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(json_body(response).await, json!({"received": true}));

    settle().await;
    let stored = app.ledger.get(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(app.shipping.shipments().len(), 1);
}

#[tokio::test]
async fn test_webhook_replay_acknowledged() {
    let app = TestApp::new();
    let order = app
        .ledger
        .seed(NewOrder::pending(None, items()), chrono::Utc::now())
        .unwrap();
    let envelope = event_envelope(
        "evt_http_dup",
        SESSION_COMPLETED,
        paid_session("cs_dup", order.id, "pi_dup"),
    );

    for _ in 0..2 {
        let (body, signature) = signed_body(&envelope);
        let response = app
            .router()
            .oneshot(webhook_request(body, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    settle().await;
    assert_eq!(app.shipping.shipments().len(), 1);
}

#[tokio::test]
async fn test_webhook_rejections_are_uniform() {
    let app = TestApp::new();
    let envelope = event_envelope(
        "evt_bad",
        SESSION_COMPLETED,
        paid_session("cs_bad", OrderId::new(1), "pi_bad"),
    );
    let (body, signature) = signed_body(&envelope);

    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");
    let stale = signature_header(
        sweetbox_integration_tests::WEBHOOK_SECRET,
        chrono::Utc::now().timestamp() - 301,
        &body,
    );

    let cases = [
        webhook_request(body.clone(), None),
        webhook_request(tampered, Some(&signature)),
        webhook_request(body.clone(), Some(&stale)),
        webhook_request(body, Some("t=1,v1=deadbeef")),
    ];

    let mut bodies = Vec::new();
    for request in cases {
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        bodies.push(json_body(response).await);
    }
    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(bodies[0]["error"], "invalid_webhook");
    assert_eq!(app.ledger.order_count(), 0);
}

#[tokio::test]
async fn test_webhook_without_configured_secret_is_rejected() {
    let app = TestApp::with_options(AppOptions {
        webhook_secret: None,
        ..test_options()
    });
    let (body, signature) = signed_body(&event_envelope("evt_1", "ping", json!({})));

    let response = app
        .router()
        .oneshot(webhook_request(body, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_for_unknown_order_is_not_found() {
    let app = TestApp::new();
    let (body, signature) = signed_body(&event_envelope(
        "evt_missing",
        SESSION_COMPLETED,
        paid_session("cs_missing", OrderId::new(404), "pi_missing"),
    ));

    let response = app
        .router()
        .oneshot(webhook_request(body, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unhandled_event_type_acknowledged() {
    let app = TestApp::new();
    let (body, signature) = signed_body(&event_envelope(
        "evt_other",
        "customer.created",
        json!({"id": "cus_1"}),
    ));

    let response = app
        .router()
        .oneshot(webhook_request(body, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.ledger.processed_event("evt_other").is_some());
}

// =============================================================================
// Checkout
// =============================================================================

#[tokio::test]
async fn test_checkout_requires_login() {
    let app = TestApp::new();
    let body = json!({
        "lines": cart(),
        "order_id": 1,
        "success_url": "https://shop.example.com/thanks",
        "cancel_url": "https://shop.example.com/cart",
    });

    let response = app
        .router()
        .oneshot(checkout_request(None, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.processor.requests().is_empty());
}

#[tokio::test]
async fn test_checkout_for_existing_order() {
    let app = TestApp::new();
    let cookie = app.login(&customer()).await;
    let order = app
        .ledger
        .seed(NewOrder::pending(Some(customer().id), items()), chrono::Utc::now())
        .unwrap();

    let body = json!({
        "lines": cart(),
        "order_id": order.id,
        "success_url": "https://shop.example.com/thanks",
        "cancel_url": "https://shop.example.com/cart",
    });
    let response = app
        .router()
        .oneshot(checkout_request(Some(&cookie), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["session_id"], "cs_test_1");
    assert_eq!(json["url"], "https://checkout.example.com/pay/cs_test_1");

    let requests = app.processor.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].metadata.get("order_id"),
        Some(&order.id.to_string())
    );
    assert_eq!(requests[0].metadata.get("authenticated_user_id").unwrap(), "7");
    assert_eq!(requests[0].customer_email.as_deref(), Some("ana@example.com"));
}

#[tokio::test]
async fn test_checkout_hides_foreign_orders() {
    let app = TestApp::new();
    let cookie = app.login(&customer()).await;
    let order = app
        .ledger
        .seed(NewOrder::pending(Some(UserId::new(99)), items()), chrono::Utc::now())
        .unwrap();

    let body = json!({
        "lines": cart(),
        "order_id": order.id,
        "success_url": "https://shop.example.com/thanks",
        "cancel_url": "https://shop.example.com/cart",
    });
    let response = app
        .router()
        .oneshot(checkout_request(Some(&cookie), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(app.processor.requests().is_empty());
}

#[tokio::test]
async fn test_checkout_rejects_paid_order() {
    let app = TestApp::new();
    let cookie = app.login(&customer()).await;
    let mut paid = NewOrder::paid_from_checkout(Some(customer().id), items(), "cs_old".to_string());
    paid.payment_reference = Some("pi_old".to_string());
    let order = app.ledger.seed(paid, chrono::Utc::now()).unwrap();

    let body = json!({
        "lines": cart(),
        "order_id": order.id,
        "success_url": "https://shop.example.com/thanks",
        "cancel_url": "https://shop.example.com/cart",
    });
    let response = app
        .router()
        .oneshot(checkout_request(Some(&cookie), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_deferred_checkout_then_webhook_creates_owned_order() {
    let app = TestApp::new();
    let cookie = app.login(&customer()).await;

    let body = json!({
        "lines": cart(),
        "order": {
            "items": [{"product_id": 4, "quantity": 2, "unit_price": "15.00"}],
            "notes": "leave at door",
        },
        "success_url": "https://shop.example.com/thanks",
        "cancel_url": "https://shop.example.com/cart",
    });
    let response = app
        .router()
        .oneshot(checkout_request(Some(&cookie), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.ledger.order_count(), 0);

    // The processor echoes the session metadata back on completion.
    let request = app.processor.requests().remove(0);
    let session = json!({
        "id": "cs_test_1",
        "payment_status": "paid",
        "payment_intent": "pi_deferred",
        "metadata": request.metadata,
        "amount_total": 3000,
        "customer_details": {"email": "someone-else@example.com"},
        "shipping_details": {"name": "Ana", "address": sweetbox_integration_tests::processor_address("8 Elm St")},
    });
    let (body, signature) = signed_body(&event_envelope("evt_deferred", SESSION_COMPLETED, session));
    let response = app
        .router()
        .oneshot(webhook_request(body, Some(&signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    settle().await;
    let orders = app.ledger.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].user_id, Some(customer().id));
    assert_eq!(orders[0].notes.as_deref(), Some("leave at door"));
    assert_eq!(orders[0].total, Decimal::new(3000, 2));
    assert!(orders[0].shipment_id.is_some());
}

#[tokio::test]
async fn test_checkout_payload_size_bound() {
    let app = TestApp::new();
    let cookie = app.login(&customer()).await;

    let payload_size = |notes_len: usize| {
        use sweetbox_core::intent::CompactOrder;
        CompactOrder {
            items: items(),
            address: None,
            notes: Some("n".repeat(notes_len)),
        }
        .encode(usize::MAX)
        .unwrap()
        .len()
    };
    let base = payload_size(1);
    let notes_for = |size: usize| 1 + size - base;
    assert_eq!(payload_size(notes_for(499)), 499);

    let request_with_notes = |len: usize| {
        json!({
            "lines": cart(),
            "order": {
                "items": [{"product_id": 4, "quantity": 2, "unit_price": "15.00"}],
                "notes": "n".repeat(len),
            },
            "success_url": "https://shop.example.com/thanks",
            "cancel_url": "https://shop.example.com/cart",
        })
    };

    let response = app
        .router()
        .oneshot(checkout_request(Some(&cookie), &request_with_notes(notes_for(501))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(response).await["error"], "payload_too_large");
    assert!(app.processor.requests().is_empty());

    let response = app
        .router()
        .oneshot(checkout_request(Some(&cookie), &request_with_notes(notes_for(499))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.processor.requests().len(), 1);
}

#[tokio::test]
async fn test_checkout_incomplete_address_stub_names_fields() {
    let app = TestApp::new();
    let cookie = app.login(&customer()).await;

    let body = json!({
        "lines": cart(),
        "order": {
            "items": [{"product_id": 4, "quantity": 2, "unit_price": "15.00"}],
            "address": {"street1": "1 Main St", "state": "TX", "country": "US"},
        },
        "success_url": "https://shop.example.com/thanks",
        "cancel_url": "https://shop.example.com/cart",
    });
    let response = app
        .router()
        .oneshot(checkout_request(Some(&cookie), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let json = json_body(response).await;
    assert_eq!(json["error"], "incomplete_address");
    assert_eq!(
        json["fields"],
        json!(["order.address.city", "order.address.postal_code"])
    );
    assert!(app.processor.requests().is_empty());
}

#[tokio::test]
async fn test_checkout_requires_exactly_one_target() {
    let app = TestApp::new();
    let cookie = app.login(&customer()).await;

    let body = json!({
        "lines": cart(),
        "success_url": "https://shop.example.com/thanks",
        "cancel_url": "https://shop.example.com/cart",
    });
    let response = app
        .router()
        .oneshot(checkout_request(Some(&cookie), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Admin
// =============================================================================

fn sweep_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::post("/admin/sweep");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_admin_sweep_reports_counts() {
    let app = TestApp::new();
    let now = chrono::Utc::now();
    let paid = app
        .ledger
        .seed(NewOrder::pending(None, items()), now - chrono::Duration::hours(1))
        .unwrap();
    app.ledger
        .seed(NewOrder::pending(None, items()), now - chrono::Duration::hours(30))
        .unwrap();
    app.processor
        .add_session(checkout_session(paid_session("cs_admin", paid.id, "pi_admin")));

    let response = app
        .router()
        .oneshot(sweep_request(Some(ADMIN_TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"fixed_count": 1, "failed_count": 1, "unresolved_count": 0, "superseded_count": 0})
    );

    settle().await;
    assert_eq!(app.shipping.shipments().len(), 1);
}

#[tokio::test]
async fn test_admin_sweep_requires_token() {
    let app = TestApp::new();

    let missing = app.router().oneshot(sweep_request(None)).await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .router()
        .oneshot(sweep_request(Some("adm_wrong_token_value")))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_sweep_hidden_without_token() {
    let app = TestApp::with_options(AppOptions {
        admin_api_token: None,
        ..test_options()
    });

    let response = app
        .router()
        .oneshot(sweep_request(Some(ADMIN_TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
