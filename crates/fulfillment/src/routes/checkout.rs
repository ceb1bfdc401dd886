//! Checkout session creation for logged-in customers.

use axum::{Json, Router, extract::State, routing::post};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sweetbox_core::address::{AddressCandidate, AddressSource};
use sweetbox_core::intent::{CheckoutIntent, CompactOrder};
use sweetbox_core::order::LineItem;
use sweetbox_core::{FlavorId, OrderId, ProductId};
use tracing::instrument;

use crate::db::OrderLedger;
use crate::error::AppError;
use crate::middleware::RequireAuth;
use crate::payments::PaymentProcessor;
use crate::services::{CartLine, CheckoutError, CheckoutOwner};
use crate::shipping::ShippingProvider;
use crate::state::AppState;

pub fn router<L, P, S>() -> Router<AppState<L, P, S>>
where
    L: OrderLedger,
    P: PaymentProcessor,
    S: ShippingProvider,
{
    Router::new().route("/api/checkout/session", post(create_session::<L, P, S>))
}

/// Checkout request body.
///
/// Exactly one of `order_id` (pay an existing order) or `order` (create the
/// order once payment succeeds) must be present.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub lines: Vec<CartLineInput>,
    #[serde(default)]
    pub order_id: Option<OrderId>,
    #[serde(default)]
    pub order: Option<DeferredOrderInput>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CartLineInput {
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct DeferredOrderInput {
    pub items: Vec<OrderItemInput>,
    #[serde(default)]
    pub address: Option<AddressInput>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderItemInput {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub flavor_ids: Vec<FlavorId>,
    #[serde(default)]
    pub custom_pack_label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AddressInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street1: Option<String>,
    pub street2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl From<AddressInput> for AddressCandidate {
    fn from(input: AddressInput) -> Self {
        Self {
            source: AddressSource::ClientMetadata,
            name: input.name,
            email: input.email,
            phone: input.phone,
            street1: input.street1,
            street2: input.street2,
            city: input.city,
            state: input.state,
            postal_code: input.postal_code,
            country: input.country,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub url: String,
}

/// Turn the request into a checkout intent.
///
/// # Errors
///
/// Returns [`AppError::BadRequest`] unless exactly one of `order_id` and
/// `order` is given, and [`CheckoutError::InvalidItem`] for an item whose
/// line total overflows.
pub fn intent_from_request(
    order_id: Option<OrderId>,
    order: Option<DeferredOrderInput>,
) -> Result<CheckoutIntent, AppError> {
    match (order_id, order) {
        (Some(order_id), None) => Ok(CheckoutIntent::Existing { order_id }),
        (None, Some(order)) => {
            let items = order
                .items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    LineItem::new(
                        item.product_id,
                        item.quantity,
                        item.unit_price,
                        item.flavor_ids,
                        item.custom_pack_label,
                    )
                    .ok_or(CheckoutError::InvalidItem {
                        index,
                        reason: "line total out of range",
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(CheckoutIntent::Deferred {
                order: CompactOrder {
                    items,
                    address: order.address.map(AddressCandidate::from),
                    notes: order.notes.filter(|notes| !notes.trim().is_empty()),
                },
            })
        }
        _ => Err(AppError::BadRequest(
            "Provide exactly one of order_id or order".to_string(),
        )),
    }
}

/// Open a hosted checkout session and return where to redirect.
#[instrument(skip_all, fields(user_id = %user.id))]
async fn create_session<L, P, S>(
    State(state): State<AppState<L, P, S>>,
    RequireAuth(user): RequireAuth,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, AppError>
where
    L: OrderLedger,
    P: PaymentProcessor,
    S: ShippingProvider,
{
    let intent = intent_from_request(body.order_id, body.order)?;
    let lines: Vec<CartLine> = body
        .lines
        .into_iter()
        .map(|line| CartLine {
            name: line.name,
            unit_price: line.unit_price,
            quantity: line.quantity,
        })
        .collect();
    let owner = CheckoutOwner {
        user_id: user.id,
        email: Some(user.email),
    };

    let redirect = state
        .checkout()
        .create_session(intent, &lines, &body.success_url, &body.cancel_url, &owner)
        .await?;

    Ok(Json(CreateSessionResponse {
        session_id: redirect.session_id,
        url: redirect.url,
    }))
}
