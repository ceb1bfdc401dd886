//! Health check endpoints.

use axum::{Router, extract::State, http::StatusCode, routing::get};

use crate::db::OrderLedger;
use crate::payments::PaymentProcessor;
use crate::shipping::ShippingProvider;
use crate::state::AppState;

pub fn router<L, P, S>() -> Router<AppState<L, P, S>>
where
    L: OrderLedger,
    P: PaymentProcessor,
    S: ShippingProvider,
{
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness::<L, P, S>))
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the ledger is not reachable.
async fn readiness<L, P, S>(State(state): State<AppState<L, P, S>>) -> StatusCode
where
    L: OrderLedger,
    P: PaymentProcessor,
    S: ShippingProvider,
{
    match state.ledger().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
