//! HTTP DTOs for the admin API.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::adapters::events::FanoutStats;
use crate::adapters::websocket::{ConnectionInfo, HubStats};
use crate::domain::foundation::{
    EventId, OrganizationId, UserId, ValidationError, WorkspaceId,
};
use crate::domain::realtime::{EventType, RealtimeEvent};

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to publish an event to connected clients.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishEventRequest {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub payload: JsonValue,

    #[serde(default)]
    pub organization_id: Option<String>,

    #[serde(default)]
    pub workspace_id: Option<String>,

    /// Explicit recipients; overrides every other routing attribute.
    #[serde(default)]
    pub user_ids: Vec<String>,

    #[serde(default)]
    pub entity_type: Option<String>,

    #[serde(default)]
    pub entity_id: Option<String>,
}

impl PublishEventRequest {
    /// Validates the request and builds a fresh event from it.
    pub fn into_event(self) -> Result<RealtimeEvent, ValidationError> {
        let mut event = RealtimeEvent::new(EventType::new(self.event_type)?, self.payload);

        if !self.user_ids.is_empty() {
            let users = self
                .user_ids
                .into_iter()
                .map(UserId::new)
                .collect::<Result<Vec<_>, _>>()?;
            event = event.to_users(users);
        }
        if let Some(org) = self.organization_id {
            event = event.in_organization(OrganizationId::new(org)?);
        }
        if let Some(ws) = self.workspace_id {
            event = event.in_workspace(WorkspaceId::new(ws)?);
        }

        match (self.entity_type, self.entity_id) {
            (Some(entity_type), Some(entity_id)) => {
                Ok(event.about_entity(entity_type, entity_id))
            }
            (None, None) => Ok(event),
            _ => Err(ValidationError::invalid_format(
                "entity",
                "entity_type and entity_id must be given together",
            )),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct PublishEventResponse {
    pub status: &'static str,
    pub event_id: EventId,
}

impl PublishEventResponse {
    pub fn accepted(event_id: EventId) -> Self {
        Self {
            status: "accepted",
            event_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub hub: HubStats,
    pub fanout: FanoutStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionsResponse {
    pub active_connections: usize,
    pub total_connections: u64,
    pub connections: Vec<ConnectionInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisconnectUserResponse {
    pub user_id: String,
    pub disconnected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

/// JSON error body shared by every admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl ErrorResponse {
    pub fn new(code: &'static str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}
