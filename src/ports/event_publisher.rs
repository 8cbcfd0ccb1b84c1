//! EventPublisher port - Interface for handing events to the hub.
//!
//! Producers publish without knowing whether delivery goes through a broker
//! or straight to local connections.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::realtime::RealtimeEvent;

/// Port for publishing realtime events.
///
/// Delivery is best-effort: a successful return means the event was accepted
/// for distribution, not that any client received it.
///
/// # Example
///
/// ```ignore
/// let event = RealtimeEvent::new(EventType::new("rfq:created")?, payload)
///     .in_organization(org_id);
/// publisher.publish(event).await?;
/// ```
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event.
    async fn publish(&self, event: RealtimeEvent) -> Result<(), DomainError>;

    /// Publish several events in order.
    ///
    /// Stops at the first failure; earlier events stay published.
    async fn publish_all(&self, events: Vec<RealtimeEvent>) -> Result<(), DomainError> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}
