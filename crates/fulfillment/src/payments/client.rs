//! Payment processor REST client.
//!
//! - Base URL: `https://api.stripe.com` (overridable for test-mode proxies)
//! - Authentication: secret key as a bearer token
//! - Requests are form-encoded, responses are JSON

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sweetbox_core::OrderId;
use tracing::{debug, instrument, warn};
use url::Url;

use super::types::{CheckoutSession, CheckoutSessionRequest};
use super::{PaymentError, PaymentProcessor, best_session_for_order};
use crate::config::StripeConfig;

const SESSIONS_PATH: &str = "/v1/checkout/sessions";

/// Page size for session listing.
const PAGE_LIMIT: u32 = 100;

/// Upper bound on pages scanned when looking up an order's sessions.
pub const MAX_PAGES: usize = 10;

/// Payment processor API client.
#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<StripeClientInner>,
}

struct StripeClientInner {
    client: reqwest::Client,
    api_base: Url,
    secret_key: SecretString,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.inner.api_base.as_str())
            .field("secret_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl StripeClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &StripeConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(StripeClientInner {
                client,
                api_base: config.api_base.clone(),
                secret_key: config.secret_key.clone(),
            }),
        })
    }

    fn url(&self, path: &str) -> Result<Url, PaymentError> {
        self.inner
            .api_base
            .join(path)
            .map_err(|e| PaymentError::Request(format!("invalid URL: {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, PaymentError> {
        let response = self
            .inner
            .client
            .get(url)
            .bearer_auth(self.inner.secret_key.expose_secret())
            .send()
            .await
            .map_err(map_transport)?;
        handle_response(response).await
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        url: Url,
        form: &[(String, String)],
    ) -> Result<T, PaymentError> {
        let response = self
            .inner
            .client
            .post(url)
            .bearer_auth(self.inner.secret_key.expose_secret())
            .form(form)
            .send()
            .await
            .map_err(map_transport)?;
        handle_response(response).await
    }
}

impl PaymentProcessor for StripeClient {
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let form = checkout_form(request);
        let session: CheckoutSession = self.post_form(self.url(SESSIONS_PATH)?, &form).await?;
        debug!(session_id = %session.id, "Checkout session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn find_session_by_payment_intent(
        &self,
        payment_intent: &str,
    ) -> Result<Option<CheckoutSession>, PaymentError> {
        let mut url = self.url(SESSIONS_PATH)?;
        url.query_pairs_mut()
            .append_pair("payment_intent", payment_intent)
            .append_pair("limit", "1");

        let page: ListResponse<CheckoutSession> = self.get(url).await?;
        Ok(page.data.into_iter().next())
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn find_session_for_order(
        &self,
        order_id: OrderId,
        created_after: DateTime<Utc>,
    ) -> Result<Option<CheckoutSession>, PaymentError> {
        let mut sessions = Vec::new();
        let mut starting_after: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut url = self.url(SESSIONS_PATH)?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("limit", &PAGE_LIMIT.to_string())
                    .append_pair("created[gte]", &created_after.timestamp().to_string());
                if let Some(cursor) = &starting_after {
                    query.append_pair("starting_after", cursor);
                }
            }

            let page: ListResponse<CheckoutSession> = self.get(url).await?;
            starting_after = page.data.last().map(|s| s.id.clone());
            sessions.extend(page.data);

            if !page.has_more || starting_after.is_none() {
                return Ok(best_session_for_order(sessions, order_id));
            }
        }

        // The unscanned pages hold the oldest sessions, closest to the order.
        warn!(
            scanned = sessions.len(),
            "Session scan hit page limit before reaching the order"
        );
        Err(PaymentError::ScanIncomplete { pages: MAX_PAGES })
    }
}

fn map_transport(e: reqwest::Error) -> PaymentError {
    if e.is_timeout() {
        PaymentError::Timeout
    } else {
        PaymentError::Request(e.to_string())
    }
}

async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, PaymentError> {
    let status = response.status();

    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| PaymentError::Response(format!("Failed to parse response: {e}")));
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .ok()
        .map_or(body, |e| {
            let message = e.error.message.unwrap_or_default();
            match e.error.kind {
                Some(kind) => format!("{kind}: {message}"),
                None => message,
            }
        });

    Err(PaymentError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Form fields for a checkout session request.
#[must_use]
pub fn checkout_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let currency = request.currency.as_lowercase();
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.to_string()),
        ("cancel_url".to_string(), request.cancel_url.to_string()),
        (
            "billing_address_collection".to_string(),
            "required".to_string(),
        ),
    ];

    for (i, line) in request.lines.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((
            format!("{prefix}[price_data][currency]"),
            currency.to_string(),
        ));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            line.unit_amount.to_string(),
        ));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            line.name.clone(),
        ));
        form.push((format!("{prefix}[quantity]"), line.quantity.to_string()));
    }

    for (key, value) in &request.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }
    for (key, value) in &request.payment_intent_metadata {
        form.push((
            format!("payment_intent_data[metadata][{key}]"),
            value.clone(),
        ));
    }

    for (i, country) in request.shipping_countries.iter().enumerate() {
        form.push((
            format!("shipping_address_collection[allowed_countries][{i}]"),
            country.clone(),
        ));
    }

    if let Some(email) = &request.customer_email {
        form.push(("customer_email".to_string(), email.clone()));
    }
    if let Some(reference) = &request.client_reference_id {
        form.push(("client_reference_id".to_string(), reference.clone()));
    }

    form
}
