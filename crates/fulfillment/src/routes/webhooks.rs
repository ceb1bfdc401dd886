//! Payment processor webhook handler.
//!
//! The body is taken as raw bytes: the signature covers the exact bytes sent,
//! so nothing may parse or re-encode it before verification.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::db::OrderLedger;
use crate::error::AppError;
use crate::payments::PaymentProcessor;
use crate::payments::webhook::SIGNATURE_HEADER;
use crate::shipping::ShippingProvider;
use crate::state::AppState;

pub fn router<L, P, S>() -> Router<AppState<L, P, S>>
where
    L: OrderLedger,
    P: PaymentProcessor,
    S: ShippingProvider,
{
    Router::new().route("/webhooks/payments", post(handle_payment_event::<L, P, S>))
}

/// Verify, reconcile and acknowledge one payment event.
///
/// Shipment creation is spawned after the ledger commit and never affects
/// the response.
#[instrument(skip_all)]
async fn handle_payment_event<L, P, S>(
    State(state): State<AppState<L, P, S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError>
where
    L: OrderLedger,
    P: PaymentProcessor,
    S: ShippingProvider,
{
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let event = state.verifier().verify(&body, signature)?;

    info!(event_id = %event.id, event_type = %event.event_type, "Payment event verified");

    let reconciliation = state.engine().handle(event).await?;

    if let Some(handoff) = reconciliation.handoff {
        state.trigger().spawn(handoff);
    }

    Ok(Json(json!({ "received": true })))
}
