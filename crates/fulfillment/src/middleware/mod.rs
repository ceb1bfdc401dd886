//! HTTP middleware.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transactions)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID
//! 4. Session layer, on the customer-facing API only
//!
//! Authentication is enforced per handler through [`auth::RequireAuth`] and
//! [`auth::authorize_admin`].

pub mod auth;
pub mod request_id;
pub mod session;

pub use auth::{RequireAuth, authorize_admin};
pub use request_id::request_id_middleware;
pub use session::create_session_layer;
