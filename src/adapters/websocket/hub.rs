//! The connection hub: a single task that owns every index.
//!
//! ```text
//!  handler ─┐                      ┌──► mailbox C1 ──► outbound pump
//!  fanout  ─┼── HubCommand queue ──► Hub ──► mailbox C2 ──► outbound pump
//!  sweeper ─┤                      │
//!  admin   ─┘                      └──► RwLock<HubStats> ◄── HubHandle::stats()
//! ```
//!
//! Every mutation (register, unregister, subscribe, unsubscribe, broadcast)
//! is a command processed in arrival order by [`Hub::run`], so the indexes
//! are never observed half-updated. Stats are republished after each command
//! into a lock that readers can take without queueing behind broadcasts.
//!
//! Delivery never blocks the hub: each recipient's mailbox is bounded and
//! written with `try_send`. A full mailbox evicts the connection as a slow
//! consumer.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::RealtimeConfig;
use crate::domain::foundation::{ConnectionId, Timestamp, UserId};
use crate::domain::realtime::{
    resolve_recipients, ConnectionIndex, ConnectionState, RealtimeEvent, Topic,
};

use super::connection::{ConnectionHandle, ConnectionInfo, DisconnectReason};
use super::messages::ServerMessage;

/// Receiving end of a connection's mailbox. Closed when the hub drops the
/// connection.
pub type Mailbox = mpsc::Receiver<Arc<str>>;

// ============================================
// Configuration and results
// ============================================

/// Tuning for the hub task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub mailbox_capacity: usize,
    pub command_queue_capacity: usize,
    pub max_subscriptions_per_connection: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            command_queue_capacity: 1024,
            max_subscriptions_per_connection: 100,
        }
    }
}

impl From<&RealtimeConfig> for HubConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            mailbox_capacity: config.mailbox_capacity,
            command_queue_capacity: config.command_queue_capacity,
            max_subscriptions_per_connection: config.max_subscriptions_per_connection,
        }
    }
}

/// Errors returned by hub operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("Connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("Connection {0} is not registered")]
    NotRegistered(ConnectionId),

    #[error("Subscription limit of {limit} reached")]
    SubscriptionLimit { limit: usize },

    #[error("Connection {0} cannot be registered in its current state")]
    InvalidState(ConnectionId),

    #[error("Hub is not running")]
    Unavailable,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections the targeting rules selected.
    pub recipients: usize,
    /// Mailboxes the event was enqueued on.
    pub delivered: usize,
    /// Recipients dropped because their mailbox was full or closed.
    pub evicted: usize,
}

/// Hub counters, republished after every command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub active_connections: usize,
    pub total_connections: u64,
    pub messages_sent: u64,
    pub broadcasts: u64,
    pub active_subscriptions: usize,
    pub topics: usize,
    pub users: usize,
    pub organizations: usize,
    pub workspaces: usize,
    pub slow_consumer_evictions: u64,
    pub stale_evictions: u64,
}

// ============================================
// Commands
// ============================================

/// Requests processed by the hub task.
#[derive(Debug)]
pub enum HubCommand {
    Register {
        handle: Arc<ConnectionHandle>,
        reply: oneshot::Sender<Result<Mailbox, HubError>>,
    },
    Unregister {
        id: ConnectionId,
        reason: DisconnectReason,
        reply: oneshot::Sender<bool>,
    },
    Subscribe {
        id: ConnectionId,
        topic: Topic,
        reply: oneshot::Sender<Result<bool, HubError>>,
    },
    Unsubscribe {
        id: ConnectionId,
        topic: Topic,
        reply: oneshot::Sender<Result<bool, HubError>>,
    },
    Broadcast {
        event: RealtimeEvent,
        reply: oneshot::Sender<BroadcastReport>,
    },
    DisconnectUser {
        user_id: UserId,
        reply: oneshot::Sender<usize>,
    },
    EvictStale {
        threshold: Duration,
        reply: oneshot::Sender<usize>,
    },
    ListConnections {
        reply: oneshot::Sender<Vec<ConnectionInfo>>,
    },
    Shutdown,
}

// ============================================
// Hub task
// ============================================

#[derive(Debug)]
struct Member {
    handle: Arc<ConnectionHandle>,
    mailbox: mpsc::Sender<Arc<str>>,
}

#[derive(Debug, Default)]
struct Counters {
    total_connections: u64,
    messages_sent: u64,
    broadcasts: u64,
    slow_consumer_evictions: u64,
    stale_evictions: u64,
}

/// The coordination task. Create with [`Hub::new`], then drive with
/// [`Hub::run`].
pub struct Hub {
    config: HubConfig,
    index: ConnectionIndex<Member>,
    commands: mpsc::Receiver<HubCommand>,
    stats: Arc<RwLock<HubStats>>,
    counters: Counters,
}

impl Hub {
    /// Creates the hub and the handle used to talk to it.
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.command_queue_capacity.max(1));
        let stats = Arc::new(RwLock::new(HubStats::default()));
        let hub = Self {
            config,
            index: ConnectionIndex::new(),
            commands: rx,
            stats: stats.clone(),
            counters: Counters::default(),
        };
        (hub, HubHandle { commands: tx, stats })
    }

    /// Creates the hub and runs it on a new task.
    pub fn spawn(config: HubConfig, shutdown: watch::Receiver<bool>) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        let task = tokio::spawn(hub.run(shutdown));
        (handle, task)
    }

    /// Processes commands until shutdown is signalled, a `Shutdown` command
    /// arrives, or every handle is dropped. All connections are then
    /// unregistered.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            mailbox_capacity = self.config.mailbox_capacity,
            max_subscriptions = self.config.max_subscriptions_per_connection,
            "Connection hub started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(HubCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.close_all();
        self.publish_stats().await;
        tracing::info!("Connection hub stopped");
    }

    async fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { handle, reply } => {
                let result = self.register(handle);
                self.reply(reply, result).await;
            }
            HubCommand::Unregister { id, reason, reply } => {
                let result = self.unregister(&id, reason);
                self.reply(reply, result).await;
            }
            HubCommand::Subscribe { id, topic, reply } => {
                let result = self.subscribe(&id, topic);
                self.reply(reply, result).await;
            }
            HubCommand::Unsubscribe { id, topic, reply } => {
                let result = self.unsubscribe(&id, &topic);
                self.reply(reply, result).await;
            }
            HubCommand::Broadcast { event, reply } => {
                let result = self.broadcast(&event);
                self.reply(reply, result).await;
            }
            HubCommand::DisconnectUser { user_id, reply } => {
                let result = self.disconnect_user(&user_id);
                self.reply(reply, result).await;
            }
            HubCommand::EvictStale { threshold, reply } => {
                let result = self.evict_stale(threshold);
                self.reply(reply, result).await;
            }
            HubCommand::ListConnections { reply } => {
                let _ = reply.send(self.list_connections());
            }
            // Intercepted by `run`.
            HubCommand::Shutdown => {}
        }
    }

    /// Publishes stats before replying, so a caller that awaited a command
    /// always reads stats that include it.
    async fn reply<T>(&self, reply: oneshot::Sender<T>, value: T) {
        self.publish_stats().await;
        let _ = reply.send(value);
    }

    fn register(&mut self, handle: Arc<ConnectionHandle>) -> Result<Mailbox, HubError> {
        let id = handle.id();
        if self.index.contains(&id) {
            tracing::warn!(connection_id = %id, "Duplicate connection registration rejected");
            return Err(HubError::AlreadyRegistered(id));
        }
        handle
            .transition(ConnectionState::Connected)
            .map_err(|_| HubError::InvalidState(id))?;

        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity.max(1));
        let context = handle.context().clone();
        let member = Member {
            handle: handle.clone(),
            mailbox: tx,
        };
        if self.index.insert(id, context, member).is_err() {
            handle.close();
            return Err(HubError::AlreadyRegistered(id));
        }
        self.counters.total_connections += 1;

        let context = handle.context();
        tracing::info!(
            connection_id = %id,
            user_id = %context.user_id,
            organization_id = context.organization_id.as_ref().map(|o| o.as_str()),
            workspace_id = context.workspace_id.as_ref().map(|w| w.as_str()),
            active_connections = self.index.len(),
            "Connection registered"
        );
        Ok(rx)
    }

    /// Removes a connection from every index. Dropping the member closes its
    /// mailbox, which ends the outbound pump.
    fn unregister(&mut self, id: &ConnectionId, reason: DisconnectReason) -> bool {
        let Some(entry) = self.index.remove(id) else {
            return false;
        };
        let member = entry.into_value();
        member.handle.close();

        match reason {
            DisconnectReason::SlowConsumer => self.counters.slow_consumer_evictions += 1,
            DisconnectReason::Stale => self.counters.stale_evictions += 1,
            _ => {}
        }

        if reason.is_eviction() {
            tracing::warn!(
                connection_id = %id,
                user_id = %member.handle.user_id(),
                reason = %reason,
                "Connection evicted"
            );
        } else {
            tracing::info!(
                connection_id = %id,
                user_id = %member.handle.user_id(),
                reason = %reason,
                active_connections = self.index.len(),
                "Connection unregistered"
            );
        }
        true
    }

    fn subscribe(&mut self, id: &ConnectionId, topic: Topic) -> Result<bool, HubError> {
        let Some(entry) = self.index.get(id) else {
            tracing::debug!(connection_id = %id, "Subscribe for unknown connection");
            return Err(HubError::NotRegistered(*id));
        };
        let limit = self.config.max_subscriptions_per_connection;
        if entry.subscriptions().len() >= limit && !entry.subscriptions().contains(&topic) {
            return Err(HubError::SubscriptionLimit { limit });
        }

        let channel = topic.to_string();
        let added = self
            .index
            .subscribe(id, topic)
            .map_err(|_| HubError::NotRegistered(*id))?;
        if added {
            tracing::debug!(connection_id = %id, channel = %channel, "Subscribed");
        }
        Ok(added)
    }

    fn unsubscribe(&mut self, id: &ConnectionId, topic: &Topic) -> Result<bool, HubError> {
        let removed = self.index.unsubscribe(id, topic).map_err(|_| {
            tracing::debug!(connection_id = %id, "Unsubscribe for unknown connection");
            HubError::NotRegistered(*id)
        })?;
        if removed {
            tracing::debug!(connection_id = %id, channel = %topic, "Unsubscribed");
        }
        Ok(removed)
    }

    fn broadcast(&mut self, event: &RealtimeEvent) -> BroadcastReport {
        self.counters.broadcasts += 1;

        let recipients = resolve_recipients(&self.index, event);
        let mut report = BroadcastReport {
            recipients: recipients.len(),
            ..BroadcastReport::default()
        };
        if recipients.is_empty() {
            tracing::trace!(event_id = %event.id, event_type = %event.event_type, "No recipients");
            return report;
        }

        let frame: Arc<str> = match ServerMessage::encode_event(event) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::warn!(event_id = %event.id, error = %e, "Failed to encode event frame");
                return report;
            }
        };

        let mut evictions = Vec::new();
        for id in &recipients {
            let Some(entry) = self.index.get(id) else {
                continue;
            };
            match entry.value().mailbox.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => evictions.push((*id, DisconnectReason::SlowConsumer)),
                Err(TrySendError::Closed(_)) => {
                    evictions.push((*id, DisconnectReason::TransportClosed))
                }
            }
        }

        for (id, reason) in evictions {
            if self.unregister(&id, reason) {
                report.evicted += 1;
            }
        }
        self.counters.messages_sent += report.delivered as u64;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            recipients = report.recipients,
            delivered = report.delivered,
            evicted = report.evicted,
            "Event broadcast"
        );
        report
    }

    fn disconnect_user(&mut self, user_id: &UserId) -> usize {
        let ids: Vec<ConnectionId> = self
            .index
            .user_connections(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.iter()
            .filter(|id| self.unregister(id, DisconnectReason::Admin))
            .count()
    }

    fn evict_stale(&mut self, threshold: Duration) -> usize {
        let cutoff = Timestamp::now().minus(threshold);
        let stale: Vec<ConnectionId> = self
            .index
            .iter()
            .filter(|(_, entry)| entry.value().handle.is_stale(cutoff))
            .map(|(id, _)| *id)
            .collect();
        stale
            .iter()
            .filter(|id| self.unregister(id, DisconnectReason::Stale))
            .count()
    }

    fn list_connections(&self) -> Vec<ConnectionInfo> {
        let mut connections: Vec<ConnectionInfo> = self
            .index
            .iter()
            .map(|(_, entry)| ConnectionInfo::snapshot(&entry.value().handle, entry.subscriptions()))
            .collect();
        connections.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then(a.connection_id.cmp(&b.connection_id))
        });
        connections
    }

    fn close_all(&mut self) {
        let ids = self.index.ids();
        let count = ids.len();
        for id in ids {
            self.unregister(&id, DisconnectReason::Shutdown);
        }
        if count > 0 {
            tracing::info!(connections = count, "Closed all connections for shutdown");
        }
    }

    async fn publish_stats(&self) {
        let snapshot = HubStats {
            active_connections: self.index.len(),
            total_connections: self.counters.total_connections,
            messages_sent: self.counters.messages_sent,
            broadcasts: self.counters.broadcasts,
            active_subscriptions: self.index.subscription_count(),
            topics: self.index.topic_count(),
            users: self.index.user_count(),
            organizations: self.index.organization_count(),
            workspaces: self.index.workspace_count(),
            slow_consumer_evictions: self.counters.slow_consumer_evictions,
            stale_evictions: self.counters.stale_evictions,
        };
        *self.stats.write().await = snapshot;
    }
}

// ============================================
// Handle
// ============================================

/// Cloneable client for the hub task.
///
/// Every method returns `HubError::Unavailable` once the hub has stopped.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    stats: Arc<RwLock<HubStats>>,
}

impl HubHandle {
    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> HubCommand,
    ) -> Result<R, HubError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| HubError::Unavailable)?;
        rx.await.map_err(|_| HubError::Unavailable)
    }

    /// Registers a connection and returns its mailbox.
    pub async fn register(&self, handle: Arc<ConnectionHandle>) -> Result<Mailbox, HubError> {
        self.request(|reply| HubCommand::Register { handle, reply }).await?
    }

    /// Removes a connection. Returns false if it was not registered.
    pub async fn unregister(
        &self,
        id: ConnectionId,
        reason: DisconnectReason,
    ) -> Result<bool, HubError> {
        self.request(|reply| HubCommand::Unregister { id, reason, reply })
            .await
    }

    /// Adds a topic subscription. Returns false if already subscribed.
    pub async fn subscribe(&self, id: ConnectionId, topic: Topic) -> Result<bool, HubError> {
        self.request(|reply| HubCommand::Subscribe { id, topic, reply })
            .await?
    }

    /// Removes a topic subscription. Returns false if not subscribed.
    pub async fn unsubscribe(&self, id: ConnectionId, topic: Topic) -> Result<bool, HubError> {
        self.request(|reply| HubCommand::Unsubscribe { id, topic, reply })
            .await?
    }

    /// Delivers an event to local connections.
    pub async fn broadcast(&self, event: RealtimeEvent) -> Result<BroadcastReport, HubError> {
        self.request(|reply| HubCommand::Broadcast { event, reply })
            .await
    }

    /// Disconnects every connection of a user.
    pub async fn disconnect_user(&self, user_id: UserId) -> Result<usize, HubError> {
        self.request(|reply| HubCommand::DisconnectUser { user_id, reply })
            .await
    }

    /// Unregisters connections silent for longer than `threshold`.
    pub async fn evict_stale(&self, threshold: Duration) -> Result<usize, HubError> {
        self.request(|reply| HubCommand::EvictStale { threshold, reply })
            .await
    }

    pub async fn list_connections(&self) -> Result<Vec<ConnectionInfo>, HubError> {
        self.request(|reply| HubCommand::ListConnections { reply })
            .await
    }

    /// Asks the hub to close all connections and stop.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::Shutdown)
            .await
            .map_err(|_| HubError::Unavailable)
    }

    /// Latest published stats. Does not queue behind hub commands.
    pub async fn stats(&self) -> HubStats {
        self.stats.read().await.clone()
    }

    /// False once the hub task has exited.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
