//! Realtime events and subscription topics.
//!
//! A `RealtimeEvent` is built by a publisher, fanned out once, and then
//! dropped. It is never persisted by the hub.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::domain::foundation::{
    EventId, OrganizationId, Timestamp, UserId, ValidationError, WorkspaceId,
};

/// Maximum length of a topic string, in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

/// Maximum length of an event type, in bytes.
pub const MAX_EVENT_TYPE_LEN: usize = 128;

fn validate_key(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::empty_field(field));
    }
    if value.len() > max {
        return Err(ValidationError::too_long(field, max, value.len()));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::invalid_format(
            field,
            "must not contain whitespace or control characters",
        ));
    }
    Ok(())
}

/// Namespaced event type such as `port_call:status_changed`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventType(String);

impl EventType {
    /// Creates a validated event type.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_key("type", &value, MAX_EVENT_TYPE_LEN)?;
        Ok(Self(value))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The domain part of the type: everything before the first `:` or `.`.
    ///
    /// A type without a separator is its own namespace.
    pub fn namespace(&self) -> &str {
        self.0
            .split(|c| c == ':' || c == '.')
            .next()
            .unwrap_or(&self.0)
    }

    /// The topic that clients subscribe to in order to follow this type.
    pub fn as_topic(&self) -> Topic {
        // Event type rules are stricter than topic rules.
        Topic(self.0.clone())
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EventType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.0
    }
}

/// A subscription key, decoupled from tenant scoping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Creates a validated topic.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_key("channel", &value, MAX_TOPIC_LEN)?;
        Ok(Self(value))
    }

    /// Composite per-resource topic `entityType:entityID`.
    pub fn for_entity(entity_type: &str, entity_id: &str) -> Result<Self, ValidationError> {
        Self::new(format!("{}:{}", entity_type, entity_id))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Topic {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Topic> for String {
    fn from(value: Topic) -> Self {
        value.0
    }
}

/// A domain event on its way to connected clients.
///
/// This is also the broker wire format, so every instance decodes exactly
/// what any other instance encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    #[serde(default)]
    pub id: EventId,

    #[serde(rename = "type")]
    pub event_type: EventType,

    #[serde(default)]
    pub payload: JsonValue,

    #[serde(default)]
    pub timestamp: Timestamp,

    /// Explicit recipients. When non-empty, all other routing is ignored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<UserId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl RealtimeEvent {
    /// Creates an unscoped event with a fresh ID and the current time.
    pub fn new(event_type: EventType, payload: JsonValue) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            payload,
            timestamp: Timestamp::now(),
            user_ids: Vec::new(),
            organization_id: None,
            workspace_id: None,
            entity_type: None,
            entity_id: None,
        }
    }

    /// Addresses the event to specific users.
    pub fn to_users(mut self, user_ids: impl IntoIterator<Item = UserId>) -> Self {
        self.user_ids = user_ids.into_iter().collect();
        self
    }

    /// Scopes the event to an organization.
    pub fn in_organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// Scopes the event to a workspace.
    pub fn in_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    /// Attaches the resource the event is about.
    pub fn about_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// True when the event names its recipients explicitly.
    pub fn has_explicit_recipients(&self) -> bool {
        !self.user_ids.is_empty()
    }

    /// The per-resource topic, when both entity attributes are present.
    pub fn entity_topic(&self) -> Option<Topic> {
        match (&self.entity_type, &self.entity_id) {
            (Some(entity_type), Some(entity_id)) => Topic::for_entity(entity_type, entity_id).ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_namespace_uses_colon_or_dot() {
        assert_eq!(EventType::new("port_call:updated").unwrap().namespace(), "port_call");
        assert_eq!(EventType::new("rfq.created").unwrap().namespace(), "rfq");
        assert_eq!(EventType::new("heartbeat").unwrap().namespace(), "heartbeat");
    }

    #[test]
    fn event_type_rejects_whitespace_and_empty() {
        assert!(EventType::new("").is_err());
        assert!(EventType::new("vessel created").is_err());
        assert!(EventType::new("a".repeat(MAX_EVENT_TYPE_LEN + 1)).is_err());
    }

    #[test]
    fn topic_rejects_overlong_values() {
        assert!(Topic::new("x".repeat(MAX_TOPIC_LEN)).is_ok());
        assert!(matches!(
            Topic::new("x".repeat(MAX_TOPIC_LEN + 1)),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn entity_topic_requires_both_parts() {
        let event = RealtimeEvent::new(EventType::new("vessel:updated").unwrap(), json!({}));
        assert!(event.entity_topic().is_none());

        let event = event.about_entity("vessel", "v-42");
        assert_eq!(event.entity_topic().unwrap().as_str(), "vessel:v-42");
    }

    #[test]
    fn serializes_with_type_tag_and_omits_empty_routing() {
        let event = RealtimeEvent::new(EventType::new("rfq:created").unwrap(), json!({"id": 1}));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "rfq:created");
        assert_eq!(value["payload"]["id"], 1);
        assert!(value.get("user_ids").is_none());
        assert!(value.get("organization_id").is_none());
    }

    #[test]
    fn deserializes_minimal_broker_payload_with_defaults() {
        let event: RealtimeEvent =
            serde_json::from_str(r#"{"type":"notification:new","organization_id":"org-1"}"#)
                .unwrap();

        assert_eq!(event.event_type.as_str(), "notification:new");
        assert_eq!(event.organization_id.unwrap().as_str(), "org-1");
        assert!(event.payload.is_null());
        assert!(event.user_ids.is_empty());
    }

    #[test]
    fn deserialization_rejects_empty_user_id() {
        let result = serde_json::from_str::<RealtimeEvent>(r#"{"type":"a:b","user_ids":[""]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn as_topic_matches_type_string() {
        let event_type = EventType::new("vessel:created").unwrap();
        assert_eq!(event_type.as_topic(), Topic::new("vessel:created").unwrap());
    }
}
