//! Shipping-rate and label provider integration.

pub mod client;

pub use client::ShippoClient;

use std::future::Future;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sweetbox_core::OrderId;
use sweetbox_core::address::CanonicalAddress;
use sweetbox_core::parcel::Parcel;
use thiserror::Error;

/// Errors talking to the shipping provider.
#[derive(Debug, Error)]
pub enum ShippingError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("label purchase failed: {0}")]
    LabelFailed(String),

    #[error("unexpected response: {0}")]
    Response(String),
}

/// A purchasable shipping rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pub rate_id: String,
    pub carrier: String,
    pub service_name: String,
    pub amount: Decimal,
    pub estimated_days: Option<u32>,
}

/// Request to create a shipment for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentRequest {
    pub order_id: OrderId,
    pub to: CanonicalAddress,
    pub parcels: Vec<Parcel>,
}

/// A purchased shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub shipment_id: String,
    pub label_url: Option<String>,
    pub tracking_number: Option<String>,
}

/// Outbound operations against the shipping provider.
pub trait ShippingProvider: Clone + Send + Sync + 'static {
    /// Rates for shipping `parcels` to `to`, in provider list order.
    fn get_rates(
        &self,
        to: &CanonicalAddress,
        parcels: &[Parcel],
    ) -> impl Future<Output = Result<Vec<Rate>, ShippingError>> + Send;

    /// Purchase a label for `request` using `rate_id`.
    fn create_shipment(
        &self,
        request: &ShipmentRequest,
        rate_id: &str,
    ) -> impl Future<Output = Result<Shipment, ShippingError>> + Send;
}
