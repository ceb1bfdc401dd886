//! Inbound payment events.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{Charge, CheckoutSession, PaymentIntent};

/// Event type for a completed hosted checkout.
pub const SESSION_COMPLETED: &str = "checkout.session.completed";
/// Event type for a charge status change.
pub const CHARGE_UPDATED: &str = "charge.updated";
/// Event type for a failed payment attempt.
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// A parsed payment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    /// Processor event id, used as the idempotency key.
    pub id: String,
    /// Raw event type string.
    pub event_type: String,
    pub created: DateTime<Utc>,
    pub kind: EventKind,
}

/// The event kinds the reconciliation engine acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    SessionCompleted(CheckoutSession),
    ChargeUpdated(Charge),
    PaymentFailed(PaymentIntent),
    /// Any other event type; acknowledged and recorded only.
    Other,
}

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

impl PaymentEvent {
    /// Parse an event from the raw webhook body.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope or the object for a known event type
    /// does not deserialize.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        let object = envelope.data.object;

        let kind = match envelope.event_type.as_str() {
            SESSION_COMPLETED => EventKind::SessionCompleted(serde_json::from_value(object)?),
            CHARGE_UPDATED => EventKind::ChargeUpdated(serde_json::from_value(object)?),
            PAYMENT_FAILED => EventKind::PaymentFailed(serde_json::from_value(object)?),
            _ => EventKind::Other,
        };

        Ok(Self {
            id: envelope.id,
            created: DateTime::from_timestamp(envelope.created, 0).unwrap_or_default(),
            event_type: envelope.event_type,
            kind,
        })
    }
}
