//! Core types for Sweetbox fulfillment.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod money;
pub mod status;

pub use id::*;
pub use money::{CurrencyCode, from_minor_units, to_minor_units};
pub use status::*;
