//! Connection identity and lifecycle state.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    AuthenticatedUser, OrganizationId, StateMachine, UserId, WorkspaceId,
};

/// Identity and tenant scope captured once at handshake.
///
/// Immutable for the life of the connection: a user switching workspace
/// reconnects and gets a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub user_id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub workspace_id: Option<WorkspaceId>,
}

impl ConnectionContext {
    /// Creates a context for a user with no tenant scope.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            organization_id: None,
            workspace_id: None,
        }
    }

    /// Scopes the context to an organization.
    pub fn with_organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// Scopes the context to a workspace.
    pub fn with_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    /// True if this connection is visible to an event with the given scope.
    ///
    /// An absent event scope matches everything; a present one must match
    /// exactly.
    pub fn within_scope(
        &self,
        organization_id: Option<&OrganizationId>,
        workspace_id: Option<&WorkspaceId>,
    ) -> bool {
        let org_ok = organization_id
            .map_or(true, |org| self.organization_id.as_ref() == Some(org));
        let ws_ok = workspace_id
            .map_or(true, |ws| self.workspace_id.as_ref() == Some(ws));
        org_ok && ws_ok
    }
}

impl From<AuthenticatedUser> for ConnectionContext {
    fn from(user: AuthenticatedUser) -> Self {
        Self {
            user_id: user.id,
            organization_id: user.organization_id,
            workspace_id: user.workspace_id,
        }
    }
}

/// Lifecycle of a single connection.
///
/// ```text
/// Connecting ──► Connected ──► Disconnecting ──► Disconnected
///      └──────────────────────────────────────────────┘
/// ```
///
/// `Disconnected` is terminal; reconnects create a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl ConnectionState {
    /// Compact encoding for atomic storage.
    pub fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Disconnecting => 2,
            ConnectionState::Disconnected => 3,
        }
    }

    /// Inverse of [`as_u8`](Self::as_u8). Unknown values decode as terminal.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl StateMachine for ConnectionState {
    fn valid_transitions(&self) -> &'static [Self] {
        use ConnectionState::*;
        match self {
            Connecting => &[Connected, Disconnected],
            Connected => &[Disconnecting],
            Disconnecting => &[Disconnected],
            Disconnected => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(org: Option<&str>, ws: Option<&str>) -> ConnectionContext {
        ConnectionContext {
            user_id: UserId::new("u1").unwrap(),
            organization_id: org.map(|o| OrganizationId::new(o).unwrap()),
            workspace_id: ws.map(|w| WorkspaceId::new(w).unwrap()),
        }
    }

    #[test]
    fn lifecycle_follows_happy_path() {
        let state = ConnectionState::Connecting;
        let state = state.transition_to(ConnectionState::Connected).unwrap();
        let state = state.transition_to(ConnectionState::Disconnecting).unwrap();
        let state = state.transition_to(ConnectionState::Disconnected).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn disconnected_cannot_be_resurrected() {
        let state = ConnectionState::Disconnected;
        assert!(state.transition_to(ConnectionState::Connected).is_err());
        assert!(state.transition_to(ConnectionState::Connecting).is_err());
    }

    #[test]
    fn connected_cannot_skip_disconnecting() {
        assert!(ConnectionState::Connected
            .transition_to(ConnectionState::Disconnected)
            .is_err());
    }

    #[test]
    fn failed_handshake_goes_straight_to_disconnected() {
        assert!(ConnectionState::Connecting
            .transition_to(ConnectionState::Disconnected)
            .is_ok());
    }

    #[test]
    fn u8_encoding_round_trips() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
        ] {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn within_scope_matches_absent_event_scope() {
        assert!(ctx(None, None).within_scope(None, None));
        assert!(ctx(Some("o1"), Some("w1")).within_scope(None, None));
    }

    #[test]
    fn within_scope_requires_exact_tenant_match() {
        let o1 = OrganizationId::new("o1").unwrap();
        let o2 = OrganizationId::new("o2").unwrap();
        let w1 = WorkspaceId::new("w1").unwrap();

        assert!(ctx(Some("o1"), Some("w1")).within_scope(Some(&o1), Some(&w1)));
        assert!(!ctx(Some("o1"), Some("w1")).within_scope(Some(&o2), None));
        assert!(!ctx(None, None).within_scope(Some(&o1), None));
        assert!(!ctx(Some("o1"), None).within_scope(Some(&o1), Some(&w1)));
    }
}
