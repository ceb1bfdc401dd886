//! Authentication extractors and checks.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use secrecy::{ExposeSecret, SecretString};
use tower_sessions::Session;

use crate::error::AppError;
use crate::models::{CurrentUser, session_keys};

/// Extractor that requires a logged-in customer.
///
/// Rejects with 401 when there is no session or no user in it.
pub struct RequireAuth(pub CurrentUser);

/// Rejection for [`RequireAuth`].
pub struct AuthRejection;

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        AppError::Unauthorized("Login required".to_string()).into_response()
    }
}

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Set by SessionManagerLayer
        let session = parts.extensions.get::<Session>().ok_or(AuthRejection)?;

        let user: CurrentUser = session
            .get(session_keys::CURRENT_USER)
            .await
            .ok()
            .flatten()
            .ok_or(AuthRejection)?;

        sentry::configure_scope(|scope| {
            scope.set_user(Some(sentry::User {
                id: Some(user.id.to_string()),
                ..Default::default()
            }));
        });

        Ok(Self(user))
    }
}

/// Check an administrative bearer token.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] when no admin token is configured, so the
/// endpoint is indistinguishable from a missing route, and
/// [`AppError::Unauthorized`] when the header is missing or wrong.
pub fn authorize_admin(headers: &HeaderMap, expected: Option<&SecretString>) -> Result<(), AppError> {
    let expected = expected.ok_or_else(|| AppError::NotFound("Not found".to_string()))?;

    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    if constant_time_compare(provided, expected.expose_secret()) {
        Ok(())
    } else {
        tracing::warn!("Rejected admin request with invalid token");
        Err(AppError::Unauthorized("Invalid token".to_string()))
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_admin_disabled_without_token() {
        let err = authorize_admin(&headers("Bearer anything"), None).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_admin_token_checks() {
        let token = SecretString::from("adm_7Qw9eR2tY5uI");
        assert!(authorize_admin(&headers("Bearer adm_7Qw9eR2tY5uI"), Some(&token)).is_ok());
        assert!(matches!(
            authorize_admin(&headers("Bearer wrong"), Some(&token)),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            authorize_admin(&HeaderMap::new(), Some(&token)),
            Err(AppError::Unauthorized(_))
        ));
    }
}
