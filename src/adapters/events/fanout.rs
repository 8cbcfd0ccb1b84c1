//! FanoutManager - bridges the message broker and the local hub.
//!
//! Publishing serializes the event and sends it to the broker channel chosen
//! by its event type. Every instance (this one included) receives it back
//! through its own subscription and hands it to its hub, so local clients
//! get each event exactly once no matter which instance published it.
//!
//! Without a broker, or after the subscription could not be established,
//! the manager runs in single-instance mode and broadcasts locally.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapters::websocket::{HubError, HubHandle};
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::realtime::{BrokerChannel, RealtimeEvent};
use crate::ports::{BrokerMessage, BrokerStream, EventPublisher, MessageBroker};

/// Whether events cross instance boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutMode {
    Distributed,
    SingleInstance,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelCounters {
    pub published: u64,
    pub received: u64,
}

/// Point-in-time fanout counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanoutStats {
    pub mode: FanoutMode,
    pub broker: Option<&'static str>,
    pub channels: Vec<&'static str>,
    pub published: u64,
    pub publish_failures: u64,
    pub received: u64,
    pub malformed: u64,
    pub per_channel: BTreeMap<&'static str, ChannelCounters>,
}

#[derive(Default)]
struct Counters {
    published: u64,
    publish_failures: u64,
    received: u64,
    malformed: u64,
    per_channel: BTreeMap<&'static str, ChannelCounters>,
}

/// Distributes events through the broker, or locally when there is none.
pub struct FanoutManager {
    broker: Option<Arc<dyn MessageBroker>>,
    hub: HubHandle,
    degraded: AtomicBool,
    counters: Mutex<Counters>,
}

impl FanoutManager {
    /// Creates a manager. `None` starts in single-instance mode.
    pub fn new(broker: Option<Arc<dyn MessageBroker>>, hub: HubHandle) -> Self {
        Self {
            broker,
            hub,
            degraded: AtomicBool::new(false),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn mode(&self) -> FanoutMode {
        match self.active_broker() {
            Some(_) => FanoutMode::Distributed,
            None => FanoutMode::SingleInstance,
        }
    }

    pub fn stats(&self) -> FanoutStats {
        let counters = self.counters();
        FanoutStats {
            mode: self.mode(),
            broker: self.broker.as_ref().map(|b| b.name()),
            channels: BrokerChannel::all_names(),
            published: counters.published,
            publish_failures: counters.publish_failures,
            received: counters.received,
            malformed: counters.malformed,
            per_channel: counters.per_channel.clone(),
        }
    }

    /// Subscribes, then listens until shutdown or until the broker stream ends.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        if let Some(stream) = self.subscribe().await {
            self.listen(stream, shutdown).await;
        }
    }

    /// Subscribes before returning, then listens on a background task.
    ///
    /// Events published after this returns are guaranteed to be seen by
    /// this instance's subscription.
    pub async fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let stream = self.subscribe().await;
        tokio::spawn(async move {
            if let Some(stream) = stream {
                self.listen(stream, shutdown).await;
            }
        })
    }

    async fn subscribe(&self) -> Option<BrokerStream> {
        let broker = self.broker.as_ref()?;
        let channels = BrokerChannel::all_names();

        match broker.subscribe(&channels).await {
            Ok(stream) => {
                tracing::info!(
                    broker = broker.name(),
                    channels = channels.len(),
                    "Subscribed to broker channels"
                );
                Some(stream)
            }
            Err(e) => {
                tracing::warn!(
                    broker = broker.name(),
                    error = %e,
                    "Broker subscription failed; running in single-instance mode"
                );
                self.degraded.store(true, Ordering::Release);
                None
            }
        }
    }

    async fn listen(&self, mut stream: BrokerStream, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Fanout listener stopping");
                        return;
                    }
                }

                message = stream.next() => {
                    let Some(message) = message else {
                        tracing::warn!("Broker stream ended; running in single-instance mode");
                        self.degraded.store(true, Ordering::Release);
                        return;
                    };
                    if let Err(HubError::Unavailable) = self.deliver(message).await {
                        tracing::debug!("Hub stopped; fanout listener exiting");
                        return;
                    }
                }
            }
        }
    }

    /// Decodes one broker message and broadcasts it locally.
    async fn deliver(&self, message: BrokerMessage) -> Result<(), HubError> {
        let channel = BrokerChannel::from_name(&message.channel);
        {
            let mut counters = self.counters();
            counters.received += 1;
            if let Some(channel) = channel {
                counters.per_channel.entry(channel.name()).or_default().received += 1;
            }
        }

        let event: RealtimeEvent = match serde_json::from_str(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                self.counters().malformed += 1;
                tracing::warn!(
                    channel = %message.channel,
                    error = %e,
                    "Dropping malformed broker payload"
                );
                return Ok(());
            }
        };

        let report = self.hub.broadcast(event).await?;
        tracing::trace!(
            channel = %message.channel,
            recipients = report.recipients,
            delivered = report.delivered,
            "Broker event delivered"
        );
        Ok(())
    }

    async fn broadcast_locally(&self, event: RealtimeEvent) -> Result<(), DomainError> {
        self.hub
            .broadcast(event)
            .await
            .map(|_| ())
            .map_err(|e| DomainError::new(ErrorCode::HubUnavailable, e.to_string()))
    }

    fn active_broker(&self) -> Option<&Arc<dyn MessageBroker>> {
        if self.degraded.load(Ordering::Acquire) {
            return None;
        }
        self.broker.as_ref()
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventPublisher for FanoutManager {
    async fn publish(&self, event: RealtimeEvent) -> Result<(), DomainError> {
        let Some(broker) = self.active_broker() else {
            return self.broadcast_locally(event).await;
        };

        let channel = BrokerChannel::for_event_type(&event.event_type);
        let payload = serde_json::to_string(&event)
            .map_err(|e| DomainError::new(ErrorCode::InternalError, e.to_string()))?;

        match broker.publish(channel.name(), &payload).await {
            Ok(receivers) => {
                let mut counters = self.counters();
                counters.published += 1;
                counters.per_channel.entry(channel.name()).or_default().published += 1;
                tracing::debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    channel = %channel,
                    receivers,
                    "Event published to broker"
                );
                Ok(())
            }
            Err(e) => {
                self.counters().publish_failures += 1;
                tracing::warn!(
                    event_type = %event.event_type,
                    channel = %channel,
                    error = %e,
                    "Broker publish failed; delivering locally"
                );
                self.broadcast_locally(event).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::InMemoryBroker;
    use crate::adapters::websocket::{ConnectionHandle, Hub, HubConfig, Mailbox};
    use crate::domain::foundation::{ConnectionId, UserId};
    use crate::domain::realtime::{ConnectionContext, EventType};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        hub: HubHandle,
        shutdown: watch::Sender<bool>,
        mailbox: Mailbox,
    }

    async fn fixture() -> Fixture {
        let (shutdown, rx) = watch::channel(false);
        let (hub, _task) = Hub::spawn(HubConfig::default(), rx);
        let conn = Arc::new(ConnectionHandle::new(
            ConnectionId::new(),
            ConnectionContext::new(UserId::new("u1").unwrap()),
        ));
        let mailbox = hub.register(conn).await.unwrap();
        Fixture {
            hub,
            shutdown,
            mailbox,
        }
    }

    fn event_for_u1(event_type: &str) -> RealtimeEvent {
        RealtimeEvent::new(EventType::new(event_type).unwrap(), json!({}))
            .to_users([UserId::new("u1").unwrap()])
    }

    async fn next_type(mailbox: &mut Mailbox) -> String {
        let frame = tokio::time::timeout(Duration::from_secs(2), mailbox.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("mailbox closed");
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        v["event"]["type"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn without_broker_publishes_locally() {
        let mut fx = fixture().await;
        let manager = FanoutManager::new(None, fx.hub.clone());

        manager.publish(event_for_u1("rfq:created")).await.unwrap();

        assert_eq!(next_type(&mut fx.mailbox).await, "rfq:created");
        let stats = manager.stats();
        assert_eq!(stats.mode, FanoutMode::SingleInstance);
        assert_eq!(stats.broker, None);
        assert_eq!(stats.published, 0);
    }

    #[tokio::test]
    async fn broker_round_trip_delivers_exactly_once() {
        let mut fx = fixture().await;
        let broker = InMemoryBroker::new();
        let manager = Arc::new(FanoutManager::new(
            Some(Arc::new(broker.clone())),
            fx.hub.clone(),
        ));
        let _listener = manager.clone().spawn(fx.shutdown.subscribe()).await;

        manager.publish(event_for_u1("vessel:created")).await.unwrap();

        assert_eq!(next_type(&mut fx.mailbox).await, "vessel:created");
        assert_eq!(broker.published_to("realtime:vessels").len(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.mailbox.try_recv().is_err());

        let stats = manager.stats();
        assert_eq!(stats.mode, FanoutMode::Distributed);
        assert_eq!(stats.broker, Some("in_memory"));
        assert_eq!(stats.published, 1);
        assert_eq!(stats.received, 1);
        assert_eq!(stats.per_channel["realtime:vessels"].published, 1);
    }

    #[tokio::test]
    async fn failed_broker_publish_falls_back_to_local() {
        let mut fx = fixture().await;
        let broker = InMemoryBroker::new();
        let manager = Arc::new(FanoutManager::new(
            Some(Arc::new(broker.clone())),
            fx.hub.clone(),
        ));
        let _listener = manager.clone().spawn(fx.shutdown.subscribe()).await;

        broker.set_unavailable(true);
        manager.publish(event_for_u1("rfq:updated")).await.unwrap();

        assert_eq!(next_type(&mut fx.mailbox).await, "rfq:updated");
        let stats = manager.stats();
        assert_eq!(stats.publish_failures, 1);
        assert_eq!(stats.mode, FanoutMode::Distributed);
    }

    #[tokio::test]
    async fn failed_subscription_degrades_to_single_instance() {
        let mut fx = fixture().await;
        let broker = InMemoryBroker::new();
        broker.set_unavailable(true);
        let manager = Arc::new(FanoutManager::new(
            Some(Arc::new(broker.clone())),
            fx.hub.clone(),
        ));

        manager.run(fx.shutdown.subscribe()).await;
        assert_eq!(manager.mode(), FanoutMode::SingleInstance);

        broker.set_unavailable(false);
        manager.publish(event_for_u1("notification:new")).await.unwrap();
        assert_eq!(next_type(&mut fx.mailbox).await, "notification:new");
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_and_listener_continues() {
        let mut fx = fixture().await;
        let broker = InMemoryBroker::new();
        let manager = Arc::new(FanoutManager::new(
            Some(Arc::new(broker.clone())),
            fx.hub.clone(),
        ));
        let _listener = manager.clone().spawn(fx.shutdown.subscribe()).await;

        broker.publish("realtime:general", "{not json").await.unwrap();
        manager.publish(event_for_u1("misc")).await.unwrap();

        assert_eq!(next_type(&mut fx.mailbox).await, "misc");
        let stats = manager.stats();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.received, 2);
    }

    #[tokio::test]
    async fn listener_stops_on_shutdown() {
        let fx = fixture().await;
        let broker = InMemoryBroker::new();
        let manager = Arc::new(FanoutManager::new(
            Some(Arc::new(broker.clone())),
            fx.hub.clone(),
        ));
        let listener = manager.clone().spawn(fx.shutdown.subscribe()).await;

        fx.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), listener)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}
