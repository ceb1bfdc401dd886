//! Sweetbox Core - Shared types and pure fulfillment logic.
//!
//! This crate provides the domain model used across Sweetbox components:
//! - `fulfillment` - Checkout, payment webhook and shipment service
//! - `cli` - Command-line tools for migrations and on-demand sweeps
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Anything here can be unit tested without a runtime.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, order/payment statuses, currency helpers
//! - [`address`] - Shipping address resolution across candidate sources
//! - [`intent`] - Checkout intents and the compact deferred-order payload
//! - [`order`] - Orders and line items
//! - [`parcel`] - Default parcel profile for shipments

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod address;
pub mod intent;
pub mod order;
pub mod parcel;
pub mod types;

pub use types::*;
