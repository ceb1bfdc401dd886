//! Payment processor integration.
//!
//! - [`client`]: REST client for hosted checkout sessions
//! - [`events`]: inbound event parsing
//! - [`webhook`]: signature verification
//! - [`types`]: processor resource types

pub mod client;
pub mod events;
pub mod types;
pub mod webhook;

pub use client::StripeClient;
pub use events::{EventKind, PaymentEvent};
pub use types::{CheckoutSession, CheckoutSessionRequest, SessionLine};
pub use webhook::{SignatureError, WebhookError, WebhookVerifier};

use std::future::Future;

use chrono::{DateTime, Utc};
use sweetbox_core::OrderId;
use thiserror::Error;

/// Errors talking to the payment processor.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Response(String),

    /// A paged listing stopped at the page cap with more results left.
    #[error("session scan stopped after {pages} pages with more results remaining")]
    ScanIncomplete { pages: usize },
}

/// Outbound operations against the payment processor.
pub trait PaymentProcessor: Clone + Send + Sync + 'static {
    /// Open a hosted checkout session.
    fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> impl Future<Output = Result<CheckoutSession, PaymentError>> + Send;

    /// The checkout session that produced a payment intent, if any.
    fn find_session_by_payment_intent(
        &self,
        payment_intent: &str,
    ) -> impl Future<Output = Result<Option<CheckoutSession>, PaymentError>> + Send;

    /// The best checkout session for an order created after `created_after`.
    ///
    /// A paid session wins over unpaid ones; otherwise the most recent.
    /// Fails with [`PaymentError::ScanIncomplete`] rather than answering
    /// from a partial listing.
    fn find_session_for_order(
        &self,
        order_id: OrderId,
        created_after: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<CheckoutSession>, PaymentError>> + Send;
}

/// Pick the best session for an order from a list of candidates.
#[must_use]
pub fn best_session_for_order(
    sessions: impl IntoIterator<Item = CheckoutSession>,
    order_id: OrderId,
) -> Option<CheckoutSession> {
    let order_id = order_id.to_string();
    sessions
        .into_iter()
        .filter(|s| {
            s.metadata
                .get(sweetbox_core::intent::metadata_keys::ORDER_ID)
                .is_some_and(|id| *id == order_id)
        })
        .max_by_key(|s| (s.is_paid(), s.created))
}
