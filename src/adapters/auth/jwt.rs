//! HS256 shared-secret JWT adapter for handshake validation.
//!
//! Session tokens are minted by the upstream application with a secret it
//! shares with the hub. The hub only verifies them:
//!
//! 1. Signature (HS256) against the shared secret
//! 2. Expiry, and issuer when one is configured
//! 3. Subject mapped to the user, tenant claims mapped to the scope
//!
//! # Example
//!
//! ```ignore
//! use realtime_hub::adapters::auth::JwtSessionValidator;
//!
//! let validator = JwtSessionValidator::new(&config.auth.jwt_secret, config.auth.issuer.clone());
//! let user = validator.validate("eyJ...").await?;
//! ```

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    AuthError, AuthenticatedUser, OrganizationId, UserId, WorkspaceId,
};
use crate::ports::SessionValidator;

/// Claims carried by a session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject - the user ID
    pub sub: String,

    /// Expiry timestamp (Unix epoch seconds)
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, alias = "org_id", skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

/// Validates HS256 session tokens.
pub struct JwtSessionValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtSessionValidator {
    /// Creates a validator for the given secret and optional expected issuer.
    pub fn new(secret: &SecretString, issuer: Option<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl SessionValidator for JwtSessionValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = decode::<SessionClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                use jsonwebtoken::errors::ErrorKind;
                match e.kind() {
                    ErrorKind::ExpiredSignature => {
                        tracing::debug!("Token expired");
                        AuthError::TokenExpired
                    }
                    ErrorKind::InvalidIssuer => {
                        tracing::warn!("Invalid issuer in token");
                        AuthError::InvalidToken
                    }
                    _ => {
                        tracing::debug!(error = %e, "Token validation failed");
                        AuthError::InvalidToken
                    }
                }
            })?
            .claims;

        let user_id = UserId::new(claims.sub.as_str()).map_err(|_| {
            tracing::warn!("Token has an empty subject");
            AuthError::InvalidToken
        })?;

        let mut user = AuthenticatedUser::new(user_id);
        if let Some(org) = claims.organization_id.filter(|o| !o.is_empty()) {
            user = user.with_organization(
                OrganizationId::new(org).map_err(|_| AuthError::InvalidToken)?,
            );
        }
        if let Some(ws) = claims.workspace_id.filter(|w| !w.is_empty()) {
            user = user.with_workspace(WorkspaceId::new(ws).map_err(|_| AuthError::InvalidToken)?);
        }
        Ok(user)
    }
}

impl std::fmt::Debug for JwtSessionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSessionValidator")
            .field("issuer", &self.validation.iss)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-with-enough-entropy";

    fn secret() -> SecretString {
        SecretString::new(SECRET.to_string())
    }

    fn token(claims: &SessionClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(exp_offset_secs: i64) -> SessionClaims {
        SessionClaims {
            sub: "user-1".to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset_secs,
            iss: Some("port-app".to_string()),
            organization_id: Some("org-1".to_string()),
            workspace_id: Some("ws-1".to_string()),
        }
    }

    #[tokio::test]
    async fn valid_token_maps_identity_and_scope() {
        let validator = JwtSessionValidator::new(&secret(), None);
        let user = validator.validate(&token(&claims(3600), SECRET)).await.unwrap();

        assert_eq!(user.id.as_str(), "user-1");
        assert_eq!(user.organization_id.unwrap().as_str(), "org-1");
        assert_eq!(user.workspace_id.unwrap().as_str(), "ws-1");
    }

    #[tokio::test]
    async fn org_id_alias_is_accepted() {
        let validator = JwtSessionValidator::new(&secret(), None);
        let raw = serde_json::json!({
            "sub": "user-2",
            "exp": chrono::Utc::now().timestamp() + 3600,
            "org_id": "org-9",
        });
        let jwt = encode(
            &Header::new(Algorithm::HS256),
            &raw,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let user = validator.validate(&jwt).await.unwrap();
        assert_eq!(user.organization_id.unwrap().as_str(), "org-9");
        assert!(user.workspace_id.is_none());
    }

    #[tokio::test]
    async fn expired_token_is_reported_as_expired() {
        let validator = JwtSessionValidator::new(&secret(), None);
        let result = validator.validate(&token(&claims(-3600), SECRET)).await;
        assert_eq!(result, Err(AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid() {
        let validator = JwtSessionValidator::new(&secret(), None);
        let result = validator.validate(&token(&claims(3600), "other-secret")).await;
        assert_eq!(result, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn issuer_is_enforced_when_configured() {
        let validator = JwtSessionValidator::new(&secret(), Some("someone-else".to_string()));
        let result = validator.validate(&token(&claims(3600), SECRET)).await;
        assert_eq!(result, Err(AuthError::InvalidToken));

        let validator = JwtSessionValidator::new(&secret(), Some("port-app".to_string()));
        assert!(validator.validate(&token(&claims(3600), SECRET)).await.is_ok());
    }

    #[tokio::test]
    async fn garbage_is_invalid() {
        let validator = JwtSessionValidator::new(&secret(), None);
        assert_eq!(validator.validate("not.a.jwt").await, Err(AuthError::InvalidToken));
    }

    #[test]
    fn jwt_validator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JwtSessionValidator>();
    }
}
