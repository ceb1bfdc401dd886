//! Hosted checkout session creation.
//!
//! A session either pays for an order the caller already owns or carries a
//! deferred order in its metadata. Everything that can be rejected locally
//! (cart shape, URLs, address stub, payload size) is rejected before the
//! processor is called.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use sweetbox_core::address::{self, IncompleteAddressError};
use sweetbox_core::intent::{CheckoutIntent, PayloadError, metadata_keys};
use sweetbox_core::order::sum_line_totals;
use sweetbox_core::{OrderId, UserId, to_minor_units};
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

use crate::config::CheckoutSettings;
use crate::db::{OrderLedger, RepositoryError};
use crate::payments::{CheckoutSessionRequest, PaymentError, PaymentProcessor, SessionLine};

/// Errors creating a checkout session.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,

    #[error("cart line {index} is invalid: {reason}")]
    InvalidLine { index: usize, reason: &'static str },

    #[error("{0} is not a valid absolute URL")]
    InvalidUrl(&'static str),

    #[error("order has no items")]
    EmptyOrder,

    #[error("order item {index} is invalid: {reason}")]
    InvalidItem { index: usize, reason: &'static str },

    #[error("cart total {cart} does not match order total {order}")]
    AmountMismatch { cart: Decimal, order: Decimal },

    #[error("incomplete address: {0}")]
    IncompleteAddress(#[from] IncompleteAddressError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {0} is already paid")]
    AlreadyPaid(OrderId),

    #[error("ledger error: {0}")]
    Ledger(#[from] RepositoryError),

    #[error("payment processor error: {0}")]
    Processor(#[from] PaymentError),
}

/// One cart line as shown on the hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
}

/// The authenticated customer opening the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutOwner {
    pub user_id: UserId,
    pub email: Option<String>,
}

/// Where to send the customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRedirect {
    pub session_id: String,
    pub url: String,
}

/// Build the outbound session request.
///
/// # Errors
///
/// Returns [`CheckoutError`] for an invalid cart, URL, deferred order or
/// address stub, a cart total that differs from a deferred order's total, or
/// a payload over the metadata limit.
pub fn build_session_request(
    intent: &CheckoutIntent,
    lines: &[CartLine],
    success_url: &str,
    cancel_url: &str,
    owner: Option<&CheckoutOwner>,
    settings: &CheckoutSettings,
) -> Result<CheckoutSessionRequest, CheckoutError> {
    let session_lines = session_lines(lines)?;
    let success_url = parse_url(success_url, "success_url")?;
    let cancel_url = parse_url(cancel_url, "cancel_url")?;

    let mut payment_intent_metadata = BTreeMap::new();
    let client_reference_id = match intent {
        CheckoutIntent::Existing { order_id } => {
            payment_intent_metadata.insert(metadata_keys::ORDER_ID.to_string(), order_id.to_string());
            Some(order_id.to_string())
        }
        CheckoutIntent::Deferred { order } => {
            if order.items.is_empty() {
                return Err(CheckoutError::EmptyOrder);
            }
            if let Some(index) = order.items.iter().position(|item| item.quantity == 0) {
                return Err(CheckoutError::InvalidItem {
                    index,
                    reason: "quantity must be positive",
                });
            }
            if let Some(index) = order
                .items
                .iter()
                .position(|item| item.unit_price.is_sign_negative())
            {
                return Err(CheckoutError::InvalidItem {
                    index,
                    reason: "unit price is negative",
                });
            }
            if let Some(stub) = &order.address {
                address::resolve(std::slice::from_ref(stub))?;
            }
            let order_total = sum_line_totals(&order.items).map_err(|index| {
                CheckoutError::InvalidItem {
                    index,
                    reason: "order total out of range",
                }
            })?;
            ensure_totals_match(cart_total(lines)?, order_total)?;
            None
        }
    };

    let metadata = intent.to_metadata(owner.map(|o| o.user_id), settings.metadata_limit_bytes)?;

    Ok(CheckoutSessionRequest {
        lines: session_lines,
        currency: settings.currency,
        success_url,
        cancel_url,
        metadata,
        payment_intent_metadata,
        client_reference_id,
        customer_email: owner.and_then(|o| o.email.clone()),
        shipping_countries: settings.allowed_countries.clone(),
    })
}

fn session_lines(lines: &[CartLine]) -> Result<Vec<SessionLine>, CheckoutError> {
    if lines.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            if line.name.trim().is_empty() {
                return Err(CheckoutError::InvalidLine {
                    index,
                    reason: "name is empty",
                });
            }
            if line.quantity == 0 {
                return Err(CheckoutError::InvalidLine {
                    index,
                    reason: "quantity must be positive",
                });
            }
            if line.unit_price.is_sign_negative() {
                return Err(CheckoutError::InvalidLine {
                    index,
                    reason: "unit price is negative",
                });
            }
            let unit_amount = to_minor_units(line.unit_price).ok_or(CheckoutError::InvalidLine {
                index,
                reason: "unit price out of range",
            })?;
            if unit_amount.checked_mul(i64::from(line.quantity)).is_none() {
                return Err(CheckoutError::InvalidLine {
                    index,
                    reason: "line total out of range",
                });
            }
            Ok(SessionLine {
                name: line.name.trim().to_string(),
                unit_amount,
                quantity: line.quantity,
            })
        })
        .collect()
}

fn parse_url(raw: &str, field: &'static str) -> Result<Url, CheckoutError> {
    Url::parse(raw)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .ok_or(CheckoutError::InvalidUrl(field))
}

fn cart_total(lines: &[CartLine]) -> Result<Decimal, CheckoutError> {
    lines
        .iter()
        .enumerate()
        .try_fold(Decimal::ZERO, |total, (index, line)| {
            line.unit_price
                .checked_mul(Decimal::from(line.quantity))
                .and_then(|line_total| total.checked_add(line_total))
                .ok_or(CheckoutError::InvalidLine {
                    index,
                    reason: "line total out of range",
                })
        })
}

fn ensure_totals_match(cart: Decimal, order: Decimal) -> Result<(), CheckoutError> {
    if cart == order {
        Ok(())
    } else {
        Err(CheckoutError::AmountMismatch { cart, order })
    }
}

/// Opens hosted checkout sessions for authenticated customers.
#[derive(Debug, Clone)]
pub struct CheckoutService<L, P> {
    ledger: L,
    processor: P,
    settings: CheckoutSettings,
}

impl<L: OrderLedger, P: PaymentProcessor> CheckoutService<L, P> {
    #[must_use]
    pub const fn new(ledger: L, processor: P, settings: CheckoutSettings) -> Self {
        Self {
            ledger,
            processor,
            settings,
        }
    }

    /// Create a hosted checkout session.
    ///
    /// An existing order must belong to `owner` and still be unpaid. A
    /// foreign order is reported as not found.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError`] if validation fails, the order cannot be
    /// paid, or the processor rejects the request.
    #[instrument(skip(self, intent, lines, success_url, cancel_url, owner), fields(user_id = %owner.user_id))]
    pub async fn create_session(
        &self,
        intent: CheckoutIntent,
        lines: &[CartLine],
        success_url: &str,
        cancel_url: &str,
        owner: &CheckoutOwner,
    ) -> Result<CheckoutRedirect, CheckoutError> {
        if let CheckoutIntent::Existing { order_id } = &intent {
            let order = self
                .ledger
                .get(*order_id)
                .await?
                .filter(|order| order.user_id == Some(owner.user_id))
                .ok_or(CheckoutError::OrderNotFound(*order_id))?;
            if order.is_paid() {
                return Err(CheckoutError::AlreadyPaid(*order_id));
            }
            ensure_totals_match(cart_total(lines)?, order.total)?;
        }

        let request = build_session_request(
            &intent,
            lines,
            success_url,
            cancel_url,
            Some(owner),
            &self.settings,
        )?;

        let session = self.processor.create_checkout_session(&request).await?;
        let url = session
            .url
            .ok_or_else(|| PaymentError::Response("checkout session has no URL".to_string()))?;

        info!(session_id = %session.id, "Checkout session created");
        Ok(CheckoutRedirect {
            session_id: session.id,
            url,
        })
    }
}
