//! Recipient resolution for a single event.
//!
//! Resolution order:
//!
//! 1. Explicit `user_ids` win outright: recipients are exactly those users'
//!    connections, and every other routing attribute is ignored.
//! 2. Otherwise a workspace ID selects every connection in that workspace,
//! 3. or, with only an organization ID, every connection in that organization.
//! 4. Subscribers of the topic equal to the event type are added, filtered to
//!    the event's organization/workspace scope.
//! 5. Subscribers of the `entityType:entityID` topic are added, filtered to
//!    the event's organization scope.
//!
//! The result is de-duplicated, so a connection matched by several rules
//! still receives the event once.

use std::collections::{BTreeSet, HashSet};

use crate::domain::foundation::ConnectionId;

use super::connection::ConnectionContext;
use super::event::RealtimeEvent;
use super::index::ConnectionIndex;

/// Computes the de-duplicated recipient set for `event`.
///
/// Output is sorted by connection ID so delivery order is stable for a
/// given index state.
pub fn resolve_recipients<T>(index: &ConnectionIndex<T>, event: &RealtimeEvent) -> Vec<ConnectionId> {
    let mut recipients = BTreeSet::new();

    if event.has_explicit_recipients() {
        for user_id in &event.user_ids {
            extend(&mut recipients, index.user_connections(user_id));
        }
        return recipients.into_iter().collect();
    }

    if let Some(workspace_id) = &event.workspace_id {
        extend(&mut recipients, index.workspace_connections(workspace_id));
    } else if let Some(organization_id) = &event.organization_id {
        extend(&mut recipients, index.organization_connections(organization_id));
    }

    let org = event.organization_id.as_ref();
    let ws = event.workspace_id.as_ref();

    add_scoped_subscribers(
        &mut recipients,
        index,
        index.topic_subscribers(&event.event_type.as_topic()),
        |ctx| ctx.within_scope(org, ws),
    );

    if let Some(entity_topic) = event.entity_topic() {
        add_scoped_subscribers(
            &mut recipients,
            index,
            index.topic_subscribers(&entity_topic),
            |ctx| ctx.within_scope(org, None),
        );
    }

    recipients.into_iter().collect()
}

fn extend(recipients: &mut BTreeSet<ConnectionId>, bucket: Option<&HashSet<ConnectionId>>) {
    if let Some(bucket) = bucket {
        recipients.extend(bucket.iter().copied());
    }
}

fn add_scoped_subscribers<T>(
    recipients: &mut BTreeSet<ConnectionId>,
    index: &ConnectionIndex<T>,
    subscribers: Option<&HashSet<ConnectionId>>,
    in_scope: impl Fn(&ConnectionContext) -> bool,
) {
    let Some(subscribers) = subscribers else {
        return;
    };
    for id in subscribers {
        if let Some(entry) = index.get(id) {
            if in_scope(entry.context()) {
                recipients.insert(*id);
            }
        }
    }
}
