//! Paged session lookups through the real processor client against a local
//! listing server.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use sweetbox_core::order::{LineItem, NewOrder};
use sweetbox_core::{OrderId, PaymentStatus, ProductId};
use sweetbox_fulfillment::config::StripeConfig;
use sweetbox_fulfillment::db::{InMemoryLedger, OrderLedger};
use sweetbox_fulfillment::payments::client::MAX_PAGES;
use sweetbox_fulfillment::payments::{PaymentError, PaymentProcessor, StripeClient};
use sweetbox_fulfillment::services::{DriftSweep, SweepReport};
use sweetbox_integration_tests::paid_session;
use url::Url;

/// Serves `pages` newest first, following `starting_after` cursors.
#[derive(Clone)]
struct Listing {
    pages: Arc<Vec<Vec<Value>>>,
    requests: Arc<AtomicUsize>,
}

async fn list_sessions(
    State(listing): State<Listing>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    listing.requests.fetch_add(1, Ordering::SeqCst);
    let index = params.get("starting_after").map_or(0, |cursor| {
        listing
            .pages
            .iter()
            .position(|page| {
                page.last().and_then(|s| s["id"].as_str()) == Some(cursor.as_str())
            })
            .map_or(listing.pages.len(), |i| i + 1)
    });
    let data = listing.pages.get(index).cloned().unwrap_or_default();
    Json(json!({
        "object": "list",
        "data": data,
        "has_more": index + 1 < listing.pages.len(),
    }))
}

/// `count` pages of unrelated sessions with `target` as the last entry of the
/// final page.
fn pages_ending_with(count: usize, target: Value) -> Vec<Vec<Value>> {
    let mut pages: Vec<Vec<Value>> = (0..count)
        .map(|page| {
            (0..3)
                .map(|n| {
                    json!({
                        "id": format!("cs_p{page}_{n}"),
                        "payment_status": "unpaid",
                        "metadata": {"order_id": (9_000 + page * 10 + n).to_string()},
                        "created": Utc::now().timestamp(),
                    })
                })
                .collect()
        })
        .collect();
    pages[count - 1].push(target);
    pages
}

async fn serve(pages: Vec<Vec<Value>>) -> (StripeClient, Arc<AtomicUsize>) {
    let requests = Arc::new(AtomicUsize::new(0));
    let listing = Listing {
        pages: Arc::new(pages),
        requests: requests.clone(),
    };
    let router = Router::new()
        .route("/v1/checkout/sessions", get(list_sessions))
        .with_state(listing);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = StripeClient::new(&StripeConfig {
        api_base: Url::parse(&format!("http://{addr}")).unwrap(),
        secret_key: SecretString::from("sk_test_listing"),
        webhook_secret: None,
        webhook_tolerance: Duration::from_secs(300),
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    (client, requests)
}

fn pending() -> NewOrder {
    NewOrder::pending(
        None,
        vec![
            LineItem::new(ProductId::new(5), 1, Decimal::new(2400, 2), vec![], None)
                .unwrap(),
        ],
    )
}

#[tokio::test]
async fn test_session_found_on_last_page_within_cap() {
    let order_id = OrderId::new(77);
    let (client, requests) =
        serve(pages_ending_with(3, paid_session("cs_target", order_id, "pi_target"))).await;

    let session = client
        .find_session_for_order(order_id, Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(session.id, "cs_target");
    assert!(session.is_paid());
    assert_eq!(requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_scan_past_page_cap_is_an_error_not_a_miss() {
    let order_id = OrderId::new(77);
    let (client, requests) = serve(pages_ending_with(
        MAX_PAGES + 1,
        paid_session("cs_target", order_id, "pi_target"),
    ))
    .await;

    let result = client
        .find_session_for_order(order_id, Utc::now() - chrono::Duration::hours(1))
        .await;

    assert!(matches!(
        result,
        Err(PaymentError::ScanIncomplete { pages }) if pages == MAX_PAGES
    ));
    assert_eq!(requests.load(Ordering::SeqCst), MAX_PAGES);
}

#[tokio::test]
async fn test_sweep_leaves_stale_order_pending_when_scan_is_cut_short() {
    let ledger = InMemoryLedger::new();
    let order = ledger
        .seed(pending(), Utc::now() - chrono::Duration::hours(48))
        .unwrap();
    let (client, _) = serve(pages_ending_with(
        MAX_PAGES + 1,
        paid_session("cs_target", order.id, "pi_target"),
    ))
    .await;

    let sweep = DriftSweep::new(ledger.clone(), client, chrono::Duration::hours(24));
    let run = sweep.sweep().await.unwrap();

    assert_eq!(
        run.report,
        SweepReport {
            unresolved_count: 1,
            ..SweepReport::default()
        }
    );
    let stored = ledger.get(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
}
