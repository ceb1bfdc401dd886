//! Shipping provider REST client.
//!
//! - Base URL: `https://api.goshippo.com`
//! - Authentication: `Authorization: ShippoToken <token>`
//! - Rates come back on a synchronously created shipment; purchasing a rate
//!   creates a transaction carrying the label.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sweetbox_core::address::CanonicalAddress;
use sweetbox_core::parcel::{DistanceUnit, MassUnit, Parcel};
use tracing::{debug, instrument};
use url::Url;

use super::{Rate, Shipment, ShipmentRequest, ShippingError, ShippingProvider};
use crate::config::{ShipFromAddress, ShippoConfig};

/// Shipping provider API client.
#[derive(Clone)]
pub struct ShippoClient {
    inner: Arc<ShippoClientInner>,
}

struct ShippoClientInner {
    client: reqwest::Client,
    api_base: Url,
    ship_from: ShipFromAddress,
}

impl std::fmt::Debug for ShippoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShippoClient")
            .field("api_base", &self.inner.api_base.as_str())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct AddressBody<'a> {
    name: &'a str,
    street1: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    street2: Option<&'a str>,
    city: &'a str,
    state: &'a str,
    zip: &'a str,
    country: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ParcelBody {
    length: String,
    width: String,
    height: String,
    distance_unit: DistanceUnit,
    weight: String,
    mass_unit: MassUnit,
}

#[derive(Debug, Serialize)]
struct CreateShipmentBody<'a> {
    address_from: AddressBody<'a>,
    address_to: AddressBody<'a>,
    parcels: Vec<ParcelBody>,
    #[serde(rename = "async")]
    is_async: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShipmentResponse {
    #[serde(default)]
    rates: Vec<RateResponse>,
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    object_id: String,
    provider: String,
    servicelevel: ServiceLevel,
    amount: Decimal,
    #[serde(default)]
    estimated_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ServiceLevel {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateTransactionBody<'a> {
    rate: &'a str,
    label_file_type: &'static str,
    #[serde(rename = "async")]
    is_async: bool,
    metadata: String,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    object_id: String,
    status: String,
    #[serde(default)]
    label_url: Option<String>,
    #[serde(default)]
    tracking_number: Option<String>,
    #[serde(default)]
    messages: Vec<TransactionMessage>,
}

#[derive(Debug, Deserialize)]
struct TransactionMessage {
    #[serde(default)]
    text: String,
}

impl<'a> AddressBody<'a> {
    fn from_origin(from: &'a ShipFromAddress) -> Self {
        Self {
            name: &from.name,
            street1: &from.street1,
            street2: from.street2.as_deref(),
            city: &from.city,
            state: &from.state,
            zip: &from.postal_code,
            country: &from.country,
            phone: from.phone.as_deref(),
            email: from.email.as_deref(),
        }
    }

    fn from_canonical(to: &'a CanonicalAddress) -> Self {
        Self {
            name: to.name.as_deref().unwrap_or_default(),
            street1: &to.street1,
            street2: to.street2.as_deref(),
            city: &to.city,
            state: &to.state,
            zip: &to.postal_code,
            country: &to.country,
            phone: to.phone.as_deref(),
            email: to.email.as_deref(),
        }
    }
}

impl From<&Parcel> for ParcelBody {
    fn from(parcel: &Parcel) -> Self {
        Self {
            length: parcel.length.to_string(),
            width: parcel.width.to_string(),
            height: parcel.height.to_string(),
            distance_unit: parcel.distance_unit,
            weight: parcel.weight.to_string(),
            mass_unit: parcel.mass_unit,
        }
    }
}

impl From<RateResponse> for Rate {
    fn from(rate: RateResponse) -> Self {
        Self {
            rate_id: rate.object_id,
            carrier: rate.provider,
            service_name: rate.servicelevel.name.unwrap_or_default(),
            amount: rate.amount,
            estimated_days: rate.estimated_days,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

impl ShippoClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the token is not a valid header value or the HTTP
    /// client fails to build.
    pub fn new(config: &ShippoConfig) -> Result<Self, ShippingError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("ShippoToken {}", config.api_token.expose_secret());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| ShippingError::Request(format!("Invalid API token format: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ShippingError::Request(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(ShippoClientInner {
                client,
                api_base: config.api_base.clone(),
                ship_from: config.ship_from.clone(),
            }),
        })
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ShippingError> {
        let url = self
            .inner
            .api_base
            .join(path)
            .map_err(|e| ShippingError::Request(format!("invalid URL: {e}")))?;

        let response = self
            .inner
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ShippingError::Timeout
                } else {
                    ShippingError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ShippingError::Response(format!("Failed to parse response: {e}")));
        }

        let message = response.text().await.unwrap_or_default();
        Err(ShippingError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

impl ShippingProvider for ShippoClient {
    #[instrument(skip(self, to, parcels), fields(country = %to.country, parcels = parcels.len()))]
    async fn get_rates(
        &self,
        to: &CanonicalAddress,
        parcels: &[Parcel],
    ) -> Result<Vec<Rate>, ShippingError> {
        let body = CreateShipmentBody {
            address_from: AddressBody::from_origin(&self.inner.ship_from),
            address_to: AddressBody::from_canonical(to),
            parcels: parcels.iter().map(ParcelBody::from).collect(),
            is_async: false,
            metadata: None,
        };

        let shipment: ShipmentResponse = self.post("/shipments/", &body).await?;
        debug!(rates = shipment.rates.len(), "Fetched shipping rates");
        Ok(shipment.rates.into_iter().map(Rate::from).collect())
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
        rate_id: &str,
    ) -> Result<Shipment, ShippingError> {
        let body = CreateTransactionBody {
            rate: rate_id,
            label_file_type: "PDF",
            is_async: false,
            metadata: format!("order {}", request.order_id),
        };

        let transaction: TransactionResponse = self.post("/transactions/", &body).await?;
        if transaction.status != "SUCCESS" {
            let reason = transaction
                .messages
                .into_iter()
                .map(|m| m.text)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ShippingError::LabelFailed(format!(
                "status {}: {reason}",
                transaction.status
            )));
        }

        Ok(Shipment {
            shipment_id: transaction.object_id,
            label_url: transaction.label_url,
            tracking_number: transaction.tracking_number,
        })
    }
}
