//! Integration test harness for Sweetbox fulfillment.
//!
//! Provides in-memory fakes for the payment processor and shipping provider,
//! builders for processor payloads, and a [`TestApp`] that wires the real
//! router to the in-memory ledger.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p sweetbox-integration-tests
//! ```
//!
//! No database or network access is needed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::response::Response;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use sweetbox_core::OrderId;
use sweetbox_core::address::CanonicalAddress;
use sweetbox_core::parcel::Parcel;
use sweetbox_fulfillment::config::CheckoutSettings;
use sweetbox_fulfillment::db::InMemoryLedger;
use sweetbox_fulfillment::middleware::session::SESSION_COOKIE_NAME;
use sweetbox_fulfillment::models::{CurrentUser, session_keys};
use sweetbox_fulfillment::payments::webhook::signature_header;
use sweetbox_fulfillment::payments::{
    CheckoutSession, CheckoutSessionRequest, PaymentError, PaymentEvent, PaymentProcessor,
    best_session_for_order,
};
use sweetbox_fulfillment::shipping::{
    Rate, Shipment, ShipmentRequest, ShippingError, ShippingProvider,
};
use sweetbox_fulfillment::state::{AppOptions, AppState};
use tower_sessions::cookie::time::{Duration as CookieDuration, OffsetDateTime};
use tower_sessions::session::{Id, Record};
use tower_sessions::{MemoryStore, SessionManagerLayer, SessionStore};

/// Webhook signing secret used by [`test_options`].
pub const WEBHOOK_SECRET: &str = "whsec_test_5f8a2c91d7e4b3a6";

/// Admin bearer token used by [`test_options`].
pub const ADMIN_TOKEN: &str = "adm_test_Qm7xP2vL9kR4tW8z";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Fake Payment Processor
// =============================================================================

/// Payment processor backed by a list of sessions.
#[derive(Debug, Clone, Default)]
pub struct FakeProcessor {
    inner: Arc<Mutex<ProcessorState>>,
}

#[derive(Debug, Default)]
struct ProcessorState {
    sessions: Vec<CheckoutSession>,
    requests: Vec<CheckoutSessionRequest>,
    fail_lookups: bool,
}

impl FakeProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a session visible to lookups.
    pub fn add_session(&self, session: CheckoutSession) {
        lock(&self.inner).sessions.push(session);
    }

    /// Every session creation request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<CheckoutSessionRequest> {
        lock(&self.inner).requests.clone()
    }

    /// Make every lookup fail with a timeout.
    pub fn fail_lookups(&self) {
        lock(&self.inner).fail_lookups = true;
    }
}

impl PaymentProcessor for FakeProcessor {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let mut state = lock(&self.inner);
        state.requests.push(request.clone());

        let id = format!("cs_test_{}", state.requests.len());
        let amount_total: i64 = request
            .lines
            .iter()
            .map(|line| line.unit_amount * i64::from(line.quantity))
            .sum();
        let mut session = checkout_session(json!({
            "id": id,
            "url": format!("https://checkout.example.com/pay/{id}"),
            "status": "open",
            "payment_status": "unpaid",
            "amount_total": amount_total,
            "created": Utc::now().timestamp(),
        }));
        session.metadata.clone_from(&request.metadata);
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn find_session_by_payment_intent(
        &self,
        payment_intent: &str,
    ) -> Result<Option<CheckoutSession>, PaymentError> {
        let state = lock(&self.inner);
        if state.fail_lookups {
            return Err(PaymentError::Timeout);
        }
        Ok(state
            .sessions
            .iter()
            .find(|s| s.payment_intent.as_deref() == Some(payment_intent))
            .cloned())
    }

    async fn find_session_for_order(
        &self,
        order_id: OrderId,
        created_after: DateTime<Utc>,
    ) -> Result<Option<CheckoutSession>, PaymentError> {
        let state = lock(&self.inner);
        if state.fail_lookups {
            return Err(PaymentError::Timeout);
        }
        let since = created_after.timestamp();
        Ok(best_session_for_order(
            state.sessions.iter().filter(|s| s.created >= since).cloned(),
            order_id,
        ))
    }
}

// =============================================================================
// Fake Shipping Provider
// =============================================================================

/// Shipping provider that records purchased labels.
#[derive(Debug, Clone)]
pub struct FakeShipping {
    inner: Arc<Mutex<ShippingState>>,
}

#[derive(Debug)]
struct ShippingState {
    rates: Vec<Rate>,
    shipments: Vec<(ShipmentRequest, String)>,
}

impl Default for FakeShipping {
    fn default() -> Self {
        Self::with_rates(vec![Rate {
            rate_id: "rate_ground".to_string(),
            carrier: "USPS".to_string(),
            service_name: "Ground Advantage".to_string(),
            amount: Decimal::new(845, 2),
            estimated_days: Some(4),
        }])
    }
}

impl FakeShipping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that quotes `rates`.
    #[must_use]
    pub fn with_rates(rates: Vec<Rate>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ShippingState {
                rates,
                shipments: Vec::new(),
            })),
        }
    }

    /// Purchased shipments with the rate each was bought at.
    #[must_use]
    pub fn shipments(&self) -> Vec<(ShipmentRequest, String)> {
        lock(&self.inner).shipments.clone()
    }
}

impl ShippingProvider for FakeShipping {
    async fn get_rates(
        &self,
        _to: &CanonicalAddress,
        _parcels: &[Parcel],
    ) -> Result<Vec<Rate>, ShippingError> {
        Ok(lock(&self.inner).rates.clone())
    }

    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
        rate_id: &str,
    ) -> Result<Shipment, ShippingError> {
        let mut state = lock(&self.inner);
        state.shipments.push((request.clone(), rate_id.to_string()));
        Ok(Shipment {
            shipment_id: format!("shp_{}", state.shipments.len()),
            label_url: None,
            tracking_number: Some(format!("9400{:018}", state.shipments.len())),
        })
    }
}

// =============================================================================
// Payload Builders
// =============================================================================

/// Deserialize a checkout session from its processor JSON.
///
/// # Panics
///
/// Panics if `value` is not a valid session.
#[must_use]
pub fn checkout_session(value: Value) -> CheckoutSession {
    serde_json::from_value(value).expect("valid checkout session JSON")
}

/// A complete processor address.
#[must_use]
pub fn processor_address(line1: &str) -> Value {
    json!({
        "line1": line1,
        "city": "Austin",
        "state": "TX",
        "postal_code": "78701",
        "country": "US",
    })
}

/// A paid session for an existing order, with a complete shipping address.
#[must_use]
pub fn paid_session(id: &str, order_id: OrderId, payment_intent: &str) -> Value {
    json!({
        "id": id,
        "status": "complete",
        "payment_status": "paid",
        "payment_intent": payment_intent,
        "metadata": {"order_id": order_id.to_string()},
        "created": Utc::now().timestamp(),
        "customer_details": {"email": "buyer@example.com", "name": "Ana Buyer"},
        "shipping_details": {"name": "Ana Buyer", "address": processor_address("500 Congress Ave")},
    })
}

/// Wrap a processor object in an event envelope.
#[must_use]
pub fn event_envelope(event_id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": event_id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": {"object": object},
    })
}

/// Parse an envelope as the webhook handler would after verification.
///
/// # Panics
///
/// Panics if the envelope does not parse.
#[must_use]
pub fn payment_event(envelope: &Value) -> PaymentEvent {
    let body = serde_json::to_vec(envelope).expect("serializable envelope");
    PaymentEvent::from_slice(&body).expect("valid event envelope")
}

/// Serialize an envelope and sign it with [`WEBHOOK_SECRET`] at the current time.
///
/// # Panics
///
/// Panics if the envelope does not serialize.
#[must_use]
pub fn signed_body(envelope: &Value) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(envelope).expect("serializable envelope");
    let header = signature_header(WEBHOOK_SECRET, Utc::now().timestamp(), &body);
    (body, header)
}

// =============================================================================
// Test Application
// =============================================================================

/// Options with webhook verification and the admin endpoint enabled.
#[must_use]
pub fn test_options() -> AppOptions {
    AppOptions {
        webhook_secret: Some(SecretString::from(WEBHOOK_SECRET)),
        webhook_tolerance: Duration::from_secs(300),
        checkout: CheckoutSettings::default(),
        stale_after: chrono::Duration::hours(24),
        admin_api_token: Some(SecretString::from(ADMIN_TOKEN)),
    }
}

/// The fulfillment router wired to in-memory collaborators.
pub struct TestApp {
    pub ledger: InMemoryLedger,
    pub processor: FakeProcessor,
    pub shipping: FakeShipping,
    pub state: AppState<InMemoryLedger, FakeProcessor, FakeShipping>,
    sessions: MemoryStore,
}

impl Default for TestApp {
    fn default() -> Self {
        Self::with_options(test_options())
    }
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_options(options: AppOptions) -> Self {
        let ledger = InMemoryLedger::new();
        let processor = FakeProcessor::new();
        let shipping = FakeShipping::new();
        let state = AppState::new(ledger.clone(), processor.clone(), shipping.clone(), options);
        Self {
            ledger,
            processor,
            shipping,
            state,
            sessions: MemoryStore::default(),
        }
    }

    /// A fresh router sharing this app's state and session store.
    #[must_use]
    pub fn router(&self) -> Router {
        let sessions = SessionManagerLayer::new(self.sessions.clone())
            .with_name(SESSION_COOKIE_NAME)
            .with_secure(false);
        sweetbox_fulfillment::app(self.state.clone(), sessions)
    }

    /// Store a session for `user` the way the storefront would and return
    /// the `Cookie` header value that carries it.
    ///
    /// # Panics
    ///
    /// Panics if the session store rejects the record.
    pub async fn login(&self, user: &CurrentUser) -> String {
        let mut record = Record {
            id: Id::default(),
            data: HashMap::from([(
                session_keys::CURRENT_USER.to_string(),
                serde_json::to_value(user).expect("serializable user"),
            )]),
            expiry_date: OffsetDateTime::now_utc() + CookieDuration::hours(1),
        };
        self.sessions
            .create(&mut record)
            .await
            .expect("session stored");
        format!("{SESSION_COOKIE_NAME}={}", record.id)
    }
}

/// Read a JSON response body.
///
/// # Panics
///
/// Panics if the body cannot be read or is not JSON.
pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    serde_json::from_slice(&bytes).expect("JSON body")
}

/// Wait for spawned shipment tasks to settle.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
