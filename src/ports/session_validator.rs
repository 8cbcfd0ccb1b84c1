//! Session validation port for handshake credentials.
//!
//! The websocket handshake hands the raw bearer token to this port and gets
//! back the identity and tenant scope of the caller. Implementations exist
//! for HS256 JWTs and for tests.

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser};

/// Validates access tokens and extracts user identity.
///
/// # Contract
///
/// Implementations must:
/// - Return `AuthError::InvalidToken` for malformed or badly signed tokens
/// - Return `AuthError::TokenExpired` for expired tokens
/// - Return `AuthError::ServiceUnavailable` for transient errors
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Validate a token (without "Bearer " prefix) and return the user.
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}
