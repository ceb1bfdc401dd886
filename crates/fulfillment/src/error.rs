//! Unified error handling for the fulfillment service.
//!
//! Every error renders as `{"error": "<reason>", "message": "...", "fields": [...]}`.
//! Server-side failures are reported to Sentry and never expose details.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use sweetbox_core::intent::PayloadError;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::payments::WebhookError;
use crate::services::{CheckoutError, ReconcileError};

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Webhook request failed verification or parsing.
    #[error("Webhook rejected: {0}")]
    Webhook(#[from] WebhookError),

    /// Reconciling a verified event failed.
    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Checkout session creation failed.
    #[error("Checkout failed: {0}")]
    Checkout(#[from] CheckoutError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<String>,
}

impl AppError {
    /// Status code, machine-readable reason and offending fields.
    fn parts(&self) -> (StatusCode, &'static str, Vec<String>) {
        match self {
            Self::Database(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", vec![])
            }
            // Uniform for every verification failure.
            Self::Webhook(_) => (StatusCode::BAD_REQUEST, "invalid_webhook", vec![]),
            Self::Reconcile(err) => match err {
                ReconcileError::OrderNotFound(_) => {
                    (StatusCode::NOT_FOUND, "order_not_found", vec![])
                }
                ReconcileError::Payload(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_webhook", vec![])
                }
                ReconcileError::Ledger(_) | ReconcileError::Processor(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", vec![])
                }
            },
            Self::Checkout(err) => checkout_parts(err),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", vec![]),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized", vec![]),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", vec![]),
        }
    }

    /// Client-facing message.
    fn public_message(&self, status: StatusCode) -> String {
        match self {
            Self::Webhook(_) => "Invalid webhook request".to_string(),
            Self::Reconcile(ReconcileError::Payload(_)) => "Invalid webhook payload".to_string(),
            Self::Checkout(CheckoutError::Processor(_)) => {
                "Payment processor unavailable".to_string()
            }
            Self::Checkout(err) if !status.is_server_error() => err.to_string(),
            Self::NotFound(message) | Self::Unauthorized(message) | Self::BadRequest(message) => {
                message.clone()
            }
            Self::Reconcile(ReconcileError::OrderNotFound(id)) => format!("Order {id} not found"),
            _ => "Internal server error".to_string(),
        }
    }
}

fn checkout_parts(err: &CheckoutError) -> (StatusCode, &'static str, Vec<String>) {
    let unprocessable = StatusCode::UNPROCESSABLE_ENTITY;
    match err {
        CheckoutError::EmptyCart => (unprocessable, "empty_cart", vec!["lines".to_string()]),
        CheckoutError::InvalidLine { index, .. } => {
            (unprocessable, "invalid_line", vec![format!("lines[{index}]")])
        }
        CheckoutError::InvalidUrl(field) => (unprocessable, "invalid_url", vec![(*field).to_string()]),
        CheckoutError::EmptyOrder => (unprocessable, "empty_order", vec!["order.items".to_string()]),
        CheckoutError::InvalidItem { index, .. } => {
            (unprocessable, "invalid_item", vec![format!("order.items[{index}]")])
        }
        CheckoutError::AmountMismatch { .. } => {
            (unprocessable, "amount_mismatch", vec!["lines".to_string()])
        }
        CheckoutError::IncompleteAddress(e) => (
            unprocessable,
            "incomplete_address",
            e.missing
                .iter()
                .map(|field| format!("order.address.{field}"))
                .collect(),
        ),
        CheckoutError::Payload(PayloadError::TooLarge { .. }) => {
            (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", vec!["order".to_string()])
        }
        CheckoutError::Payload(_) => (unprocessable, "invalid_order", vec!["order".to_string()]),
        CheckoutError::OrderNotFound(_) => {
            (StatusCode::NOT_FOUND, "order_not_found", vec!["order_id".to_string()])
        }
        CheckoutError::AlreadyPaid(_) => (StatusCode::CONFLICT, "order_already_paid", vec![]),
        CheckoutError::Ledger(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", vec![]),
        CheckoutError::Processor(_) => (StatusCode::BAD_GATEWAY, "payment_processor_error", vec![]),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, reason, fields) = self.parts();

        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Fulfillment request error"
            );
        } else if matches!(self, Self::Webhook(_) | Self::Reconcile(_)) {
            // The client gets a uniform body; operators get the cause.
            tracing::warn!(error = %self, "Webhook rejected");
        }

        let body = ErrorBody {
            error: reason,
            message: self.public_message(status),
            fields,
        };

        (status, Json(body)).into_response()
    }
}
