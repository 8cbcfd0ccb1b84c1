//! Authentication configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

/// Session token validation settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// HS256 shared secret for session tokens
    pub jwt_secret: Option<SecretString>,

    /// Expected `iss` claim, when set
    pub issuer: Option<String>,

    /// Accept `user_id`/`organization_id`/`workspace_id` query parameters
    /// when no token is supplied. Never honored in production.
    #[serde(default)]
    pub allow_identity_fallback: bool,
}

impl AuthConfig {
    /// The secret, ignoring blank values.
    pub fn jwt_secret(&self) -> Option<&SecretString> {
        self.jwt_secret
            .as_ref()
            .filter(|s| !s.expose_secret().trim().is_empty())
    }

    /// Validate authentication configuration
    ///
    /// Production requires a JWT secret and forbids identity fallback.
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        if *environment == Environment::Production {
            if self.jwt_secret().is_none() {
                return Err(ValidationError::MissingRequired("auth.jwt_secret"));
            }
            if self.allow_identity_fallback {
                return Err(ValidationError::IdentityFallbackInProduction);
            }
        }
        if self.jwt_secret().is_none() && !self.allow_identity_fallback {
            return Err(ValidationError::NoIdentitySource);
        }
        Ok(())
    }
}
