//! Administrative endpoints.

use axum::{Json, Router, extract::State, http::HeaderMap, routing::post};
use tracing::{info, instrument};

use crate::db::OrderLedger;
use crate::error::AppError;
use crate::middleware::authorize_admin;
use crate::payments::PaymentProcessor;
use crate::services::SweepReport;
use crate::shipping::ShippingProvider;
use crate::state::AppState;

pub fn router<L, P, S>() -> Router<AppState<L, P, S>>
where
    L: OrderLedger,
    P: PaymentProcessor,
    S: ShippingProvider,
{
    Router::new().route("/admin/sweep", post(run_sweep::<L, P, S>))
}

/// Run the drift sweep on demand and return its counts.
#[instrument(skip_all)]
async fn run_sweep<L, P, S>(
    State(state): State<AppState<L, P, S>>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, AppError>
where
    L: OrderLedger,
    P: PaymentProcessor,
    S: ShippingProvider,
{
    authorize_admin(&headers, state.admin_api_token())?;

    info!("On-demand drift sweep requested");
    let run = state.sweep().sweep().await?;

    for handoff in run.handoffs {
        state.trigger().spawn(handoff);
    }

    Ok(Json(run.report))
}
