//! Authentication types for the domain layer.
//!
//! These types represent an identity extracted from a validated session
//! token. They have no provider dependencies: any token issuer can populate
//! them via the `SessionValidator` port.

use super::{OrganizationId, UserId, WorkspaceId};
use thiserror::Error;

/// Identity extracted from a validated session token.
///
/// Carries the tenant scope used for connection indexing: the organization
/// and workspace are optional because platform-level users belong to neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// The unique user identifier from the auth service.
    pub id: UserId,

    /// Organization (tenant) the session is scoped to, if any.
    pub organization_id: Option<OrganizationId>,

    /// Workspace (sub-tenant) the session is scoped to, if any.
    pub workspace_id: Option<WorkspaceId>,
}

impl AuthenticatedUser {
    /// Creates a new authenticated user with no tenant scope.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            organization_id: None,
            workspace_id: None,
        }
    }

    /// Scopes the user to an organization.
    pub fn with_organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// Scopes the user to a workspace.
    pub fn with_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }
}

/// Authentication errors that can occur during token validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The token is malformed or has an invalid signature.
    #[error("Invalid token")]
    InvalidToken,

    /// The token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// The authentication service is unavailable (network, config, etc.).
    #[error("Auth service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    /// Creates a service unavailable error with a message.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Returns true if this is a transient error that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::ServiceUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_user_new_has_no_scope() {
        let user = AuthenticatedUser::new(UserId::new("user-123").unwrap());
        assert_eq!(user.id.as_str(), "user-123");
        assert!(user.organization_id.is_none());
        assert!(user.workspace_id.is_none());
    }

    #[test]
    fn builder_sets_tenant_scope() {
        let user = AuthenticatedUser::new(UserId::new("u").unwrap())
            .with_organization(OrganizationId::new("o").unwrap())
            .with_workspace(WorkspaceId::new("w").unwrap());
        assert_eq!(user.organization_id.unwrap().as_str(), "o");
        assert_eq!(user.workspace_id.unwrap().as_str(), "w");
    }

    #[test]
    fn only_service_unavailable_is_transient() {
        assert!(AuthError::service_unavailable("down").is_transient());
        assert!(!AuthError::InvalidToken.is_transient());
        assert!(!AuthError::TokenExpired.is_transient());
    }
}
