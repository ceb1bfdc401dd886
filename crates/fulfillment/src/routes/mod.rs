//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Liveness
//! GET  /health/ready           - Readiness (ledger reachable)
//!
//! # Payment processor
//! POST /webhooks/payments      - Signed payment events (raw body)
//!
//! # Customer API (session required)
//! POST /api/checkout/session   - Open a hosted checkout session
//!
//! # Admin (bearer token)
//! POST /admin/sweep            - Run the drift sweep now
//! ```

pub mod admin;
pub mod checkout;
pub mod health;
pub mod webhooks;

use axum::Router;

use crate::db::OrderLedger;
use crate::payments::PaymentProcessor;
use crate::shipping::ShippingProvider;
use crate::state::AppState;

/// Routes that do not use sessions.
pub fn routes<L, P, S>() -> Router<AppState<L, P, S>>
where
    L: OrderLedger,
    P: PaymentProcessor,
    S: ShippingProvider,
{
    Router::new()
        .merge(health::router())
        .merge(webhooks::router())
        .merge(admin::router())
}

/// Customer-facing routes; wrap in a session layer.
pub fn api_routes<L, P, S>() -> Router<AppState<L, P, S>>
where
    L: OrderLedger,
    P: PaymentProcessor,
    S: ShippingProvider,
{
    checkout::router()
}
