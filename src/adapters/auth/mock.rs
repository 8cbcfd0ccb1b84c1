//! Mock session validator for tests.
//!
//! Implements the `SessionValidator` port without real tokens, so handshake
//! paths can be exercised end to end.
//!
//! # Example
//!
//! ```ignore
//! use realtime_hub::adapters::auth::MockSessionValidator;
//!
//! let validator = MockSessionValidator::new().with_test_user("valid-token", "user-123");
//! let result = validator.validate("valid-token").await;
//! assert!(result.is_ok());
//! ```

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser, UserId};
use crate::ports::SessionValidator;

/// Mock session validator for testing.
///
/// Stores a map of tokens to users. Tokens not in the map return `InvalidToken`.
#[derive(Debug, Default)]
pub struct MockSessionValidator {
    tokens: RwLock<HashMap<String, AuthenticatedUser>>,
    /// Returned for every validation when set
    force_error: RwLock<Option<AuthError>>,
}

impl MockSessionValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a valid token that maps to a user.
    pub fn with_user(self, token: impl Into<String>, user: AuthenticatedUser) -> Self {
        self.add_token(token, user);
        self
    }

    /// Adds a valid token for an unscoped user with the given ID.
    ///
    /// An empty ID is ignored.
    pub fn with_test_user(self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        match UserId::new(user_id) {
            Ok(id) => self.with_user(token, AuthenticatedUser::new(id)),
            Err(_) => self,
        }
    }

    /// Forces all validations to return the specified error.
    pub fn with_error(self, error: AuthError) -> Self {
        *write(&self.force_error) = Some(error);
        self
    }

    pub fn clear_error(&self) {
        *write(&self.force_error) = None;
    }

    /// Registers a new valid token at runtime.
    pub fn add_token(&self, token: impl Into<String>, user: AuthenticatedUser) {
        write(&self.tokens).insert(token.into(), user);
    }

    pub fn remove_token(&self, token: &str) {
        write(&self.tokens).remove(token);
    }

    pub fn token_count(&self) -> usize {
        read(&self.tokens).len()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SessionValidator for MockSessionValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        if let Some(error) = read(&self.force_error).clone() {
            return Err(error);
        }

        read(&self.tokens)
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::OrganizationId;

    fn test_user() -> AuthenticatedUser {
        AuthenticatedUser::new(UserId::new("user-123").unwrap())
            .with_organization(OrganizationId::new("org-1").unwrap())
    }

    #[tokio::test]
    async fn mock_validator_returns_user_for_registered_token() {
        let validator = MockSessionValidator::new().with_user("valid-token", test_user());

        let user = validator.validate("valid-token").await.unwrap();

        assert_eq!(user, test_user());
    }

    #[tokio::test]
    async fn mock_validator_returns_invalid_token_for_unknown() {
        let validator = MockSessionValidator::new();

        let result = validator.validate("unknown").await;

        assert_eq!(result, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn mock_validator_with_test_user_creates_user() {
        let validator = MockSessionValidator::new().with_test_user("token", "u-7");

        let user = validator.validate("token").await.unwrap();

        assert_eq!(user.id.as_str(), "u-7");
        assert!(user.organization_id.is_none());
    }

    #[tokio::test]
    async fn mock_validator_with_error_forces_error() {
        let validator = MockSessionValidator::new()
            .with_user("valid-token", test_user())
            .with_error(AuthError::service_unavailable("down"));

        let result = validator.validate("valid-token").await;
        assert!(matches!(result, Err(AuthError::ServiceUnavailable(_))));

        validator.clear_error();
        assert!(validator.validate("valid-token").await.is_ok());
    }

    #[tokio::test]
    async fn mock_validator_tokens_can_change_at_runtime() {
        let validator = MockSessionValidator::new();
        validator.add_token("t", test_user());
        assert_eq!(validator.token_count(), 1);
        assert!(validator.validate("t").await.is_ok());

        validator.remove_token("t");
        assert_eq!(validator.token_count(), 0);
        assert_eq!(validator.validate("t").await, Err(AuthError::InvalidToken));
    }
}
