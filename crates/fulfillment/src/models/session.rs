//! Session-stored customer identity.
//!
//! Sessions are written by the storefront at login and read here; this
//! service never logs anyone in.

use serde::{Deserialize, Serialize};
use sweetbox_core::UserId;

/// The logged-in customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: String,
}

/// Session keys.
pub mod keys {
    /// Key for the current logged-in customer.
    pub const CURRENT_USER: &str = "current_user";
}
