//! Static API key guard for the admin API.
//!
//! When a key is configured, every request must carry it in `X-Admin-Key`.
//! Without a configured key the guard lets everything through.
//!
//! ```ignore
//! let guarded = admin_routes()
//!     .layer(middleware::from_fn_with_state(AdminKey::new(key), require_admin_key));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Expected admin key, if any.
#[derive(Clone, Default)]
pub struct AdminKey(Option<Arc<SecretString>>);

impl AdminKey {
    pub fn new(key: Option<SecretString>) -> Self {
        Self(key.map(Arc::new))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    /// Checks the request headers against the configured key.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), AdminAuthRejection> {
        let Some(expected) = &self.0 else {
            return Ok(());
        };

        let provided = headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AdminAuthRejection::Missing)?;

        if bool::from(provided.as_bytes().ct_eq(expected.expose_secret().as_bytes())) {
            Ok(())
        } else {
            Err(AdminAuthRejection::Invalid)
        }
    }
}

impl std::fmt::Debug for AdminKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminKey")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Why an admin request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAuthRejection {
    Missing,
    Invalid,
}

impl IntoResponse for AdminAuthRejection {
    fn into_response(self) -> Response {
        let message = match self {
            AdminAuthRejection::Missing => "Admin key required",
            AdminAuthRejection::Invalid => "Invalid admin key",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": message,
                "code": "ADMIN_AUTH_ERROR"
            })),
        )
            .into_response()
    }
}

/// Middleware enforcing [`AdminKey`].
pub async fn require_admin_key(
    State(key): State<AdminKey>,
    request: Request,
    next: Next,
) -> Response {
    match key.check(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            tracing::warn!(
                path = %request.uri().path(),
                reason = ?rejection,
                "Admin request rejected"
            );
            rejection.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = value {
            headers.insert(ADMIN_KEY_HEADER, HeaderValue::from_static(value));
        }
        headers
    }

    fn key(value: &str) -> AdminKey {
        AdminKey::new(Some(SecretString::new(value.to_string())))
    }

    #[test]
    fn disabled_guard_allows_everything() {
        let guard = AdminKey::default();
        assert!(!guard.is_enabled());
        assert_eq!(guard.check(&headers(None)), Ok(()));
    }

    #[test]
    fn missing_header_is_rejected() {
        assert_eq!(key("s3cret").check(&headers(None)), Err(AdminAuthRejection::Missing));
    }

    #[test]
    fn wrong_key_is_rejected() {
        assert_eq!(
            key("s3cret").check(&headers(Some("nope"))),
            Err(AdminAuthRejection::Invalid)
        );
    }

    #[test]
    fn matching_key_passes() {
        assert_eq!(key("s3cret").check(&headers(Some("s3cret"))), Ok(()));
    }

    #[test]
    fn rejection_is_unauthorized() {
        let response = AdminAuthRejection::Invalid.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn debug_hides_key() {
        assert!(!format!("{:?}", key("s3cret")).contains("s3cret"));
    }
}
