//! Order and line item domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::address::CanonicalAddress;
use crate::types::{FlavorId, OrderId, OrderStatus, PaymentStatus, ProductId, UserId};

/// One line of an order. Immutable once the order exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Always `unit_price * quantity`.
    pub line_total: Decimal,
    #[serde(default)]
    pub flavor_ids: Vec<FlavorId>,
    #[serde(default)]
    pub custom_pack_label: Option<String>,
}

impl LineItem {
    /// Create a line item, computing its line total.
    ///
    /// Returns `None` if the line total does not fit in a `Decimal`.
    #[must_use]
    pub fn new(
        product_id: ProductId,
        quantity: u32,
        unit_price: Decimal,
        flavor_ids: Vec<FlavorId>,
        custom_pack_label: Option<String>,
    ) -> Option<Self> {
        let line_total = unit_price.checked_mul(Decimal::from(quantity))?;
        Some(Self {
            product_id,
            quantity,
            unit_price,
            line_total,
            flavor_ids,
            custom_pack_label,
        })
    }
}

/// Sum line totals.
///
/// # Errors
///
/// Returns the index of the item at which the sum overflows.
pub fn sum_line_totals(items: &[LineItem]) -> Result<Decimal, usize> {
    items
        .iter()
        .enumerate()
        .try_fold(Decimal::ZERO, |total, (index, item)| {
            total.checked_add(item.line_total).ok_or(index)
        })
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// `None` for guest checkout.
    pub user_id: Option<UserId>,
    pub total: Decimal,
    pub items: Vec<LineItem>,
    pub shipping_address: Option<CanonicalAddress>,
    pub notes: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// External shipment reference. Set at most once, never cleared.
    pub shipment_id: Option<String>,
    /// Completed checkout session that materialized or paid this order.
    pub checkout_session_id: Option<String>,
    /// Processor payment reference (payment intent) once known.
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether payment has been reconciled as successful.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    /// Whether a shipment has already been created for this order.
    #[must_use]
    pub const fn has_shipment(&self) -> bool {
        self.shipment_id.is_some()
    }
}

/// Data for inserting an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: Option<UserId>,
    pub items: Vec<LineItem>,
    pub shipping_address: Option<CanonicalAddress>,
    pub notes: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub checkout_session_id: Option<String>,
    pub payment_reference: Option<String>,
}

impl NewOrder {
    /// An eagerly created order awaiting payment.
    #[must_use]
    pub const fn pending(user_id: Option<UserId>, items: Vec<LineItem>) -> Self {
        Self {
            user_id,
            items,
            shipping_address: None,
            notes: None,
            status: OrderStatus::PendingPayment,
            payment_status: PaymentStatus::Pending,
            checkout_session_id: None,
            payment_reference: None,
        }
    }

    /// An order materialized from a completed checkout, already paid.
    #[must_use]
    pub const fn paid_from_checkout(
        user_id: Option<UserId>,
        items: Vec<LineItem>,
        checkout_session_id: String,
    ) -> Self {
        Self {
            user_id,
            items,
            shipping_address: None,
            notes: None,
            status: OrderStatus::Confirmed,
            payment_status: PaymentStatus::Paid,
            checkout_session_id: Some(checkout_session_id),
            payment_reference: None,
        }
    }

    /// Sum of line totals, or `None` on overflow.
    #[must_use]
    pub fn total(&self) -> Option<Decimal> {
        sum_line_totals(&self.items).ok()
    }
}
