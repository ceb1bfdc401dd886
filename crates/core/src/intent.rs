//! Checkout intents carried through payment processor metadata.
//!
//! A checkout either pays for an order that already exists, or carries the
//! whole order in compact form so it can be created only once payment
//! succeeds (deferred creation). Either way the intent rides in the
//! processor's string-to-string metadata and comes back unchanged on the
//! webhook event.
//!
//! # Compact payload schema (version 1)
//!
//! ```text
//! {"v":1,
//!  "i":[[product_id, quantity, "unit_price", "line_total", [flavor_id, ...], "label"|null], ...],
//!  "a":{"n":name,"e":email,"p":phone,"s1":street1,"s2":street2,"c":city,"st":state,"z":postal,"co":country},
//!  "n":"notes"}
//! ```
//!
//! `a`, `n` and every address key are omitted when empty. The encoded string
//! must fit in a single metadata value, see [`DEFAULT_METADATA_LIMIT_BYTES`].

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{AddressCandidate, AddressSource};
use crate::order::{LineItem, sum_line_totals};
use crate::types::{FlavorId, OrderId, ProductId, UserId};

/// Current compact payload schema version.
pub const PAYLOAD_VERSION: u8 = 1;

/// Default maximum size of one metadata value, in bytes.
pub const DEFAULT_METADATA_LIMIT_BYTES: usize = 500;

/// Metadata keys written on outbound sessions.
pub mod metadata_keys {
    /// Existing order being paid for.
    pub const ORDER_ID: &str = "order_id";
    /// Authenticated owner of the checkout.
    pub const AUTHENTICATED_USER_ID: &str = "authenticated_user_id";
    /// Compact deferred order payload.
    pub const ORDER_PAYLOAD: &str = "order_payload";
}

/// Errors encoding or decoding checkout metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Encoded payload does not fit the processor's metadata value limit.
    #[error("order payload is {size} bytes, limit is {limit}")]
    TooLarge {
        /// Encoded size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// Payload was written by an unknown schema version.
    #[error("unsupported order payload version {0}")]
    UnsupportedVersion(u8),

    /// Payload or metadata could not be parsed.
    #[error("malformed checkout metadata: {0}")]
    Malformed(String),
}

/// An order that does not exist yet, in the form carried by metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactOrder {
    pub items: Vec<LineItem>,
    /// Client-supplied address stub (lowest priority address candidate).
    pub address: Option<AddressCandidate>,
    pub notes: Option<String>,
}

/// What a checkout session pays for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutIntent {
    /// An order already in the ledger (e.g. a payment retry).
    Existing { order_id: OrderId },
    /// An order to be created on first successful payment.
    Deferred { order: CompactOrder },
}

/// An intent recovered from inbound event metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnedIntent {
    pub intent: CheckoutIntent,
    /// Owner stamped at session creation; `None` for guest checkout.
    pub owner: Option<UserId>,
}

// =============================================================================
// Wire Schema
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct WireOrder {
    v: u8,
    i: Vec<WireItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    a: Option<WireAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    n: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireItem(i32, u32, Decimal, Decimal, Vec<i32>, Option<String>);

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    c: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    st: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    z: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    co: Option<String>,
}

impl From<&AddressCandidate> for WireAddress {
    fn from(address: &AddressCandidate) -> Self {
        Self {
            n: address.name.clone(),
            e: address.email.clone(),
            p: address.phone.clone(),
            s1: address.street1.clone(),
            s2: address.street2.clone(),
            c: address.city.clone(),
            st: address.state.clone(),
            z: address.postal_code.clone(),
            co: address.country.clone(),
        }
    }
}

impl From<WireAddress> for AddressCandidate {
    fn from(wire: WireAddress) -> Self {
        Self {
            source: AddressSource::ClientMetadata,
            name: wire.n,
            email: wire.e,
            phone: wire.p,
            street1: wire.s1,
            street2: wire.s2,
            city: wire.c,
            state: wire.st,
            postal_code: wire.z,
            country: wire.co,
        }
    }
}

// =============================================================================
// Encode / Decode
// =============================================================================

impl CompactOrder {
    /// Encode as a compact payload string no larger than `limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::TooLarge`] if the encoded payload exceeds `limit`.
    pub fn encode(&self, limit: usize) -> Result<String, PayloadError> {
        let wire = WireOrder {
            v: PAYLOAD_VERSION,
            i: self
                .items
                .iter()
                .map(|item| {
                    WireItem(
                        item.product_id.as_i32(),
                        item.quantity,
                        item.unit_price.normalize(),
                        item.line_total.normalize(),
                        item.flavor_ids.iter().map(FlavorId::as_i32).collect(),
                        item.custom_pack_label.clone(),
                    )
                })
                .collect(),
            a: self.address.as_ref().map(WireAddress::from),
            n: self.notes.clone().filter(|n| !n.is_empty()),
        };

        let encoded =
            serde_json::to_string(&wire).map_err(|e| PayloadError::Malformed(e.to_string()))?;

        if encoded.len() > limit {
            return Err(PayloadError::TooLarge {
                size: encoded.len(),
                limit,
            });
        }

        Ok(encoded)
    }

    /// Decode a compact payload string.
    ///
    /// Line totals are recomputed and must match the carried totals.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::UnsupportedVersion`] for unknown schema versions
    /// and [`PayloadError::Malformed`] for anything that does not parse or
    /// fails validation.
    pub fn decode(encoded: &str) -> Result<Self, PayloadError> {
        let wire: WireOrder =
            serde_json::from_str(encoded).map_err(|e| PayloadError::Malformed(e.to_string()))?;

        if wire.v != PAYLOAD_VERSION {
            return Err(PayloadError::UnsupportedVersion(wire.v));
        }
        if wire.i.is_empty() {
            return Err(PayloadError::Malformed("order has no items".to_string()));
        }

        let items = wire
            .i
            .into_iter()
            .map(|WireItem(product_id, quantity, unit_price, line_total, flavors, label)| {
                if quantity == 0 {
                    return Err(PayloadError::Malformed(format!(
                        "product {product_id} has zero quantity"
                    )));
                }
                let item = LineItem::new(
                    ProductId::new(product_id),
                    quantity,
                    unit_price,
                    flavors.into_iter().map(FlavorId::new).collect(),
                    label,
                )
                .ok_or_else(|| {
                    PayloadError::Malformed(format!("line total for product {product_id} overflows"))
                })?;
                if item.line_total != line_total {
                    return Err(PayloadError::Malformed(format!(
                        "line total for product {product_id} is {line_total}, expected {}",
                        item.line_total
                    )));
                }
                Ok(item)
            })
            .collect::<Result<Vec<_>, _>>()?;
        sum_line_totals(&items)
            .map_err(|_| PayloadError::Malformed("order total overflows".to_string()))?;

        Ok(Self {
            items,
            address: wire.a.map(AddressCandidate::from),
            notes: wire.n,
        })
    }
}

impl CheckoutIntent {
    /// Build the metadata map for an outbound checkout session.
    ///
    /// The owner is stamped whenever known so deferred creation never has to
    /// infer ownership from the payer's email.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::TooLarge`] if a deferred payload exceeds `limit`.
    pub fn to_metadata(
        &self,
        owner: Option<UserId>,
        limit: usize,
    ) -> Result<BTreeMap<String, String>, PayloadError> {
        let mut metadata = BTreeMap::new();

        match self {
            Self::Existing { order_id } => {
                metadata.insert(metadata_keys::ORDER_ID.to_string(), order_id.to_string());
            }
            Self::Deferred { order } => {
                metadata.insert(
                    metadata_keys::ORDER_PAYLOAD.to_string(),
                    order.encode(limit)?,
                );
            }
        }

        if let Some(owner) = owner {
            metadata.insert(
                metadata_keys::AUTHENTICATED_USER_ID.to_string(),
                owner.to_string(),
            );
        }

        Ok(metadata)
    }

    /// Recover the intent from inbound event metadata.
    ///
    /// Returns `Ok(None)` when the metadata carries neither an order id nor a
    /// payload (e.g. a payment that never belonged to a checkout).
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if an order id, owner id or payload is present
    /// but cannot be parsed.
    pub fn from_metadata(
        metadata: &BTreeMap<String, String>,
    ) -> Result<Option<ReturnedIntent>, PayloadError> {
        let owner = metadata
            .get(metadata_keys::AUTHENTICATED_USER_ID)
            .filter(|v| !v.trim().is_empty())
            .map(|v| {
                v.parse::<UserId>()
                    .map_err(|e| PayloadError::Malformed(format!("authenticated_user_id: {e}")))
            })
            .transpose()?;

        if let Some(raw) = metadata.get(metadata_keys::ORDER_ID) {
            let order_id = raw
                .parse::<OrderId>()
                .map_err(|e| PayloadError::Malformed(format!("order_id: {e}")))?;
            return Ok(Some(ReturnedIntent {
                intent: Self::Existing { order_id },
                owner,
            }));
        }

        match metadata.get(metadata_keys::ORDER_PAYLOAD) {
            Some(raw) => Ok(Some(ReturnedIntent {
                intent: Self::Deferred {
                    order: CompactOrder::decode(raw)?,
                },
                owner,
            })),
            None => Ok(None),
        }
    }
}
