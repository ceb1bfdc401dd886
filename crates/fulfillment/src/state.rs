//! Application state shared across handlers.
//!
//! Every external client is constructed once at startup and handed to the
//! services that use it; nothing is reached through globals. The state is
//! generic over the ledger, processor and shipping provider so tests can run
//! the full router against in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::config::{CheckoutSettings, FulfillmentConfig};
use crate::db::{OrderLedger, PgOrderLedger};
use crate::payments::{PaymentProcessor, StripeClient, WebhookVerifier};
use crate::services::{CheckoutService, DriftSweep, ReconciliationEngine, ShipmentTrigger};
use crate::shipping::{ShippingProvider, ShippoClient};

/// State used by the production binary.
pub type ProductionState = AppState<PgOrderLedger, StripeClient, ShippoClient>;

/// Settings the services need beyond their clients.
#[derive(Clone)]
pub struct AppOptions {
    pub webhook_secret: Option<SecretString>,
    pub webhook_tolerance: Duration,
    pub checkout: CheckoutSettings,
    pub stale_after: chrono::Duration,
    pub admin_api_token: Option<SecretString>,
}

impl std::fmt::Debug for AppOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppOptions")
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .field("webhook_tolerance", &self.webhook_tolerance)
            .field("checkout", &self.checkout)
            .field("stale_after", &self.stale_after)
            .field("admin_api_token", &self.admin_api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AppOptions {
    /// Options from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &FulfillmentConfig) -> Self {
        Self {
            webhook_secret: config.stripe.webhook_secret.clone(),
            webhook_tolerance: config.stripe.webhook_tolerance,
            checkout: config.checkout.clone(),
            stale_after: config.sweep.stale_after,
            admin_api_token: config.admin_api_token.clone(),
        }
    }
}

/// Application state shared across all handlers.
pub struct AppState<L, P, S> {
    inner: Arc<AppStateInner<L, P, S>>,
}

impl<L, P, S> Clone for AppState<L, P, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct AppStateInner<L, P, S> {
    ledger: L,
    verifier: WebhookVerifier,
    engine: ReconciliationEngine<L, P>,
    checkout: CheckoutService<L, P>,
    trigger: ShipmentTrigger<L, S>,
    sweep: DriftSweep<L, P>,
    admin_api_token: Option<SecretString>,
}

impl<L: OrderLedger, P: PaymentProcessor, S: ShippingProvider> AppState<L, P, S> {
    /// Wire the services around the given clients.
    #[must_use]
    pub fn new(ledger: L, processor: P, shipping: S, options: AppOptions) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                verifier: WebhookVerifier::new(options.webhook_secret, options.webhook_tolerance),
                engine: ReconciliationEngine::new(ledger.clone(), processor.clone()),
                checkout: CheckoutService::new(ledger.clone(), processor.clone(), options.checkout),
                trigger: ShipmentTrigger::new(ledger.clone(), shipping),
                sweep: DriftSweep::new(ledger.clone(), processor, options.stale_after),
                admin_api_token: options.admin_api_token,
                ledger,
            }),
        }
    }

    /// Get the order ledger.
    #[must_use]
    pub fn ledger(&self) -> &L {
        &self.inner.ledger
    }

    /// Get the webhook verifier.
    #[must_use]
    pub fn verifier(&self) -> &WebhookVerifier {
        &self.inner.verifier
    }

    /// Get the reconciliation engine.
    #[must_use]
    pub fn engine(&self) -> &ReconciliationEngine<L, P> {
        &self.inner.engine
    }

    /// Get the checkout service.
    #[must_use]
    pub fn checkout(&self) -> &CheckoutService<L, P> {
        &self.inner.checkout
    }

    /// Get the shipment trigger.
    #[must_use]
    pub fn trigger(&self) -> &ShipmentTrigger<L, S> {
        &self.inner.trigger
    }

    /// Get the drift sweep.
    #[must_use]
    pub fn sweep(&self) -> &DriftSweep<L, P> {
        &self.inner.sweep
    }

    /// Get the admin API token, if the admin endpoint is enabled.
    #[must_use]
    pub fn admin_api_token(&self) -> Option<&SecretString> {
        self.inner.admin_api_token.as_ref()
    }
}
