//! Webhook signature verification.
//!
//! The processor signs `"{timestamp}.{raw body}"` with HMAC-SHA256 and sends
//! `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]`. Verification runs on
//! the exact request bytes before anything is parsed.

use std::time::Duration;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use super::events::PaymentEvent;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Why a webhook signature was rejected.
///
/// All variants produce the same client response; the variant is for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("no webhook secret configured")]
    MissingSecret,
    #[error("signature header missing")]
    MissingHeader,
    #[error("signature header malformed")]
    MalformedHeader,
    #[error("signature timestamp outside tolerance")]
    OutsideTolerance,
    #[error("signature mismatch")]
    Mismatch,
}

/// Errors turning a raw webhook request into an event.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook signature rejected: {0}")]
    Signature(#[from] SignatureError),
    #[error("malformed event payload: {0}")]
    Malformed(String),
}

/// Verifies and parses inbound payment events.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<SecretString>,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl WebhookVerifier {
    /// Create a verifier. With no secret every request is rejected.
    #[must_use]
    pub const fn new(secret: Option<SecretString>, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    /// Verify the signature over `payload` and parse the event.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Signature`] if verification fails and
    /// [`WebhookError::Malformed`] if a verified payload does not parse.
    pub fn verify(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<PaymentEvent, WebhookError> {
        self.verify_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    /// [`Self::verify`] against an explicit current time (unix seconds).
    ///
    /// # Errors
    ///
    /// See [`Self::verify`].
    pub fn verify_at(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
        now: i64,
    ) -> Result<PaymentEvent, WebhookError> {
        verify_signature(
            payload,
            signature_header,
            self.secret.as_ref(),
            self.tolerance,
            now,
        )?;
        PaymentEvent::from_slice(payload).map_err(|e| WebhookError::Malformed(e.to_string()))
    }
}

/// Verify a webhook signature header against the raw payload.
///
/// # Errors
///
/// Returns [`SignatureError`] describing the first check that failed.
pub fn verify_signature(
    payload: &[u8],
    signature_header: Option<&str>,
    secret: Option<&SecretString>,
    tolerance: Duration,
    now: i64,
) -> Result<(), SignatureError> {
    let secret = secret
        .filter(|s| !s.expose_secret().is_empty())
        .ok_or(SignatureError::MissingSecret)?;
    let header = signature_header
        .filter(|h| !h.trim().is_empty())
        .ok_or(SignatureError::MissingHeader)?;

    let (timestamp, signatures) = parse_header(header)?;

    let tolerance = i64::try_from(tolerance.as_secs()).unwrap_or(i64::MAX);
    if now.abs_diff(timestamp) > tolerance.unsigned_abs() {
        return Err(SignatureError::OutsideTolerance);
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    // Constant-time comparison against each candidate signature
    let matched = signatures
        .iter()
        .filter_map(|candidate| hex::decode(candidate).ok())
        .any(|candidate| mac.clone().verify_slice(&candidate).is_ok());

    if !matched {
        return Err(SignatureError::Mismatch);
    }

    debug!("Webhook signature verified");
    Ok(())
}

fn parse_header(header: &str) -> Result<(i64, Vec<&str>), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            return Err(SignatureError::MalformedHeader);
        };
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::MalformedHeader)?,
                );
            }
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok((timestamp, signatures)),
        _ => Err(SignatureError::MalformedHeader),
    }
}

/// Build a signature header for `payload`, as the processor would.
///
/// Used to replay captured events locally and in tests.
#[must_use]
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}
