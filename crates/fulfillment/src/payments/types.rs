//! Payment processor resource types.
//!
//! Field names follow the processor's REST/JSON representation so the same
//! types deserialize from webhook payloads and API responses.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use sweetbox_core::CurrencyCode;
use sweetbox_core::address::{AddressCandidate, AddressSource};
use sweetbox_core::from_minor_units;
use url::Url;

/// Payment state of a checkout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
    #[serde(other)]
    Other,
}

/// A hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Session lifecycle (`open`, `complete`, `expired`).
    #[serde(default)]
    pub status: Option<String>,
    pub payment_status: SessionPaymentStatus,
    #[serde(default, deserialize_with = "expandable_id")]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Total in minor units.
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub shipping_details: Option<ShippingDetails>,
    #[serde(default)]
    pub collected_information: Option<CollectedInformation>,
    /// Unix timestamp.
    #[serde(default)]
    pub created: i64,
}

/// Customer and billing details collected at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<ProcessorAddress>,
}

/// Shipping details collected at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<ProcessorAddress>,
}

/// Newer API versions nest shipping details here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedInformation {
    #[serde(default)]
    pub shipping_details: Option<ShippingDetails>,
}

/// Postal address as the processor reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorAddress {
    #[serde(default)]
    pub line1: Option<String>,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl CheckoutSession {
    /// Whether the processor reports the session as paid.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status == SessionPaymentStatus::Paid
    }

    /// Shipping details, from whichever field the API version populated.
    #[must_use]
    pub fn shipping(&self) -> Option<&ShippingDetails> {
        self.collected_information
            .as_ref()
            .and_then(|info| info.shipping_details.as_ref())
            .or(self.shipping_details.as_ref())
    }

    /// Session total in standard units.
    #[must_use]
    pub fn amount_total(&self) -> Option<Decimal> {
        self.amount_total.map(from_minor_units)
    }

    /// Address candidates collected by the processor, highest priority first.
    #[must_use]
    pub fn address_candidates(&self) -> Vec<AddressCandidate> {
        let mut candidates = Vec::with_capacity(2);

        if let Some(shipping) = self.shipping() {
            candidates.push(candidate(
                AddressSource::ProcessorShipping,
                shipping.name.as_ref(),
                None,
                shipping.phone.as_ref(),
                shipping.address.as_ref(),
            ));
        }
        if let Some(customer) = &self.customer_details {
            candidates.push(candidate(
                AddressSource::ProcessorBilling,
                customer.name.as_ref(),
                customer.email.as_ref(),
                customer.phone.as_ref(),
                customer.address.as_ref(),
            ));
        }

        candidates
    }
}

fn candidate(
    source: AddressSource,
    name: Option<&String>,
    email: Option<&String>,
    phone: Option<&String>,
    address: Option<&ProcessorAddress>,
) -> AddressCandidate {
    let address = address.cloned().unwrap_or_default();
    AddressCandidate {
        source,
        name: name.cloned(),
        email: email.cloned(),
        phone: phone.cloned(),
        street1: address.line1,
        street2: address.line2,
        city: address.city,
        state: address.state,
        postal_code: address.postal_code,
        country: address.country,
    }
}

/// A charge, as carried by `charge.updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    #[serde(default, deserialize_with = "expandable_id")]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub status: Option<String>,
}

/// A payment intent, as carried by `payment_intent.payment_failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
}

/// Reason the most recent payment attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPaymentError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One line item on an outbound checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLine {
    pub name: String,
    /// Unit price in minor units.
    pub unit_amount: i64,
    pub quantity: u32,
}

/// Everything needed to open a hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub lines: Vec<SessionLine>,
    pub currency: CurrencyCode,
    pub success_url: Url,
    pub cancel_url: Url,
    /// Session metadata (the checkout intent).
    pub metadata: BTreeMap<String, String>,
    /// Metadata copied onto the resulting payment intent.
    pub payment_intent_metadata: BTreeMap<String, String>,
    pub client_reference_id: Option<String>,
    pub customer_email: Option<String>,
    /// Countries the hosted checkout collects shipping addresses for. Never empty.
    pub shipping_countries: Vec<String>,
}

/// Accept either a bare id or an expanded object with an `id`.
fn expandable_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Expandable {
        Id(String),
        Object { id: String },
    }

    Ok(
        Option::<Expandable>::deserialize(deserializer)?.map(|value| match value {
            Expandable::Id(id) | Expandable::Object { id } => id,
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_deserializes_processor_json() {
        let session: CheckoutSession = serde_json::from_value(json!({
            "id": "cs_test_1",
            "object": "checkout.session",
            "payment_status": "paid",
            "payment_intent": {"id": "pi_1", "object": "payment_intent"},
            "metadata": {"order_id": "12"},
            "amount_total": 2599,
            "customer_details": {
                "email": "ana@example.com",
                "address": {"line1": "1 Main", "city": "Austin", "state": "TX",
                            "postal_code": "78701", "country": "US"}
            },
            "collected_information": {
                "shipping_details": {"name": "Ana", "address": {"line1": "9 Elm"}}
            },
            "created": 1_760_000_000
        }))
        .unwrap();

        assert!(session.is_paid());
        assert_eq!(session.payment_intent.as_deref(), Some("pi_1"));
        assert_eq!(session.amount_total(), Some(Decimal::new(2599, 2)));
        assert_eq!(
            session.shipping().unwrap().address.as_ref().unwrap().line1.as_deref(),
            Some("9 Elm")
        );

        let candidates = session.address_candidates();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].source, AddressSource::ProcessorShipping);
        assert_eq!(candidates[1].email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn test_unknown_payment_status() {
        let session: CheckoutSession = serde_json::from_value(json!({
            "id": "cs_2",
            "payment_status": "processing"
        }))
        .unwrap();
        assert_eq!(session.payment_status, SessionPaymentStatus::Other);
        assert!(session.address_candidates().is_empty());
    }
}
