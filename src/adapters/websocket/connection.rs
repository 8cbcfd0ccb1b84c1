//! Per-connection shared state.
//!
//! A `ConnectionHandle` is shared between the hub and the connection's two
//! pumps. Only the hub changes indexed data (context, subscriptions); the
//! pumps touch the heartbeat clock and read the lifecycle state, both of
//! which live in atomics so no lock is taken on the hot path.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use serde::Serialize;

use crate::domain::foundation::{
    ConnectionId, OrganizationId, StateMachine, Timestamp, UserId, ValidationError, WorkspaceId,
};
use crate::domain::realtime::{ConnectionContext, ConnectionState, Topic};

/// Shared handle to a live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    context: ConnectionContext,
    connected_at: Timestamp,
    last_seen_ms: AtomicI64,
    state: AtomicU8,
}

impl ConnectionHandle {
    /// Creates a handle in the `Connecting` state.
    pub fn new(id: ConnectionId, context: ConnectionContext) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            context,
            connected_at: now,
            last_seen_ms: AtomicI64::new(now.as_unix_millis()),
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn user_id(&self) -> &UserId {
        &self.context.user_id
    }

    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    /// Last time any frame was seen from the client.
    pub fn last_seen(&self) -> Timestamp {
        Timestamp::from_unix_millis(self.last_seen_ms.load(Ordering::Acquire))
    }

    /// Records client activity now.
    pub fn touch(&self) {
        self.touch_at(Timestamp::now());
    }

    /// Records client activity at a given instant. Never moves the clock back.
    pub fn touch_at(&self, at: Timestamp) {
        self.last_seen_ms
            .fetch_max(at.as_unix_millis(), Ordering::AcqRel);
    }

    /// Forces the heartbeat clock to a specific instant.
    #[cfg(test)]
    pub(crate) fn set_last_seen(&self, at: Timestamp) {
        self.last_seen_ms.store(at.as_unix_millis(), Ordering::Release);
    }

    /// True if no activity was seen since `cutoff`.
    pub fn is_stale(&self, cutoff: Timestamp) -> bool {
        self.last_seen().is_before(&cutoff)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `target` if the lifecycle allows it.
    pub fn transition(&self, target: ConnectionState) -> Result<ConnectionState, ValidationError> {
        let mut current = self.state();
        loop {
            let next = current.transition_to(target)?;
            match self.state.compare_exchange(
                current.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next),
                Err(actual) => current = ConnectionState::from_u8(actual),
            }
        }
    }

    /// Walks the handle to `Disconnected` from whatever state it is in.
    pub fn close(&self) {
        loop {
            let next = match self.state() {
                ConnectionState::Connecting | ConnectionState::Disconnecting => {
                    ConnectionState::Disconnected
                }
                ConnectionState::Connected => ConnectionState::Disconnecting,
                ConnectionState::Disconnected => return,
            };
            // A lost race just means another caller advanced the state.
            let _ = self.transition(next);
        }
    }
}

/// Why a connection left the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Client sent a close frame or ended the stream.
    ClientClosed,
    /// Reading from the transport failed.
    TransportError,
    /// The connection's mailbox was already closed.
    TransportClosed,
    /// A write did not complete within the write timeout.
    WriteTimeout,
    /// An inbound frame exceeded the size limit.
    MessageTooLarge,
    /// The mailbox was full when an event was delivered.
    SlowConsumer,
    /// No heartbeat within the staleness threshold.
    Stale,
    /// Disconnected by an operator.
    Admin,
    /// Service is shutting down.
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::TransportError => "transport_error",
            DisconnectReason::TransportClosed => "transport_closed",
            DisconnectReason::WriteTimeout => "write_timeout",
            DisconnectReason::MessageTooLarge => "message_too_large",
            DisconnectReason::SlowConsumer => "slow_consumer",
            DisconnectReason::Stale => "stale",
            DisconnectReason::Admin => "admin",
            DisconnectReason::Shutdown => "shutdown",
        }
    }

    /// True for reasons where the hub, not the client, ended the connection.
    pub fn is_eviction(&self) -> bool {
        matches!(
            self,
            DisconnectReason::SlowConsumer
                | DisconnectReason::Stale
                | DisconnectReason::Admin
                | DisconnectReason::MessageTooLarge
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of a connection, for the admin API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    pub state: ConnectionState,
    pub connected_at: Timestamp,
    pub last_seen: Timestamp,
    pub subscriptions: Vec<String>,
}

impl ConnectionInfo {
    /// Builds a snapshot; subscriptions are sorted for stable output.
    pub fn snapshot<'a>(
        handle: &ConnectionHandle,
        subscriptions: impl IntoIterator<Item = &'a Topic>,
    ) -> Self {
        let mut subscriptions: Vec<String> =
            subscriptions.into_iter().map(|t| t.as_str().to_string()).collect();
        subscriptions.sort();
        let context = handle.context();
        Self {
            connection_id: handle.id(),
            user_id: context.user_id.clone(),
            organization_id: context.organization_id.clone(),
            workspace_id: context.workspace_id.clone(),
            state: handle.state(),
            connected_at: handle.connected_at(),
            last_seen: handle.last_seen(),
            subscriptions,
        }
    }
}
