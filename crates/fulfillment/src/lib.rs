//! Sweetbox Fulfillment - checkout, payment reconciliation and shipments.
//!
//! This crate turns payment processor events into durable order state and
//! hands paid orders to the shipping provider.
//!
//! # Architecture
//!
//! - [`services::CheckoutService`] opens hosted checkout sessions, either for
//!   an existing order or with the order carried in session metadata
//! - [`services::ReconciliationEngine`] applies verified webhook events to the
//!   order ledger exactly once
//! - [`services::DriftSweep`] converges orders whose events never arrived
//! - [`services::ShipmentTrigger`] buys a label for each paid order, off the
//!   request path
//!
//! The order ledger, payment processor and shipping provider sit behind
//! traits so the whole router can run against in-memory fakes.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod routes;
pub mod services;
pub mod shipping;
pub mod state;

use axum::Router;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tower_sessions::{SessionManagerLayer, SessionStore};
use tracing::Span;

use crate::db::OrderLedger;
use crate::payments::PaymentProcessor;
use crate::shipping::ShippingProvider;
use crate::state::AppState;

/// Build the application router.
///
/// Sessions are only attached to the customer API; webhooks, health checks
/// and the admin endpoint never touch the session store.
pub fn app<L, P, S, Store>(state: AppState<L, P, S>, sessions: SessionManagerLayer<Store>) -> Router
where
    L: OrderLedger,
    P: PaymentProcessor,
    S: ShippingProvider,
    Store: SessionStore + Clone,
{
    Router::new()
        .merge(routes::routes())
        .merge(routes::api_routes().layer(sessions))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}
