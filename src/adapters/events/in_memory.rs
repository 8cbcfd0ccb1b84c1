//! In-memory message broker for tests and single-process simulation.
//!
//! Backed by a tokio broadcast channel. Cloning the broker shares the
//! underlying bus, so several hub instances in one process can be wired to
//! the same broker to exercise cross-instance fanout.
//!
//! Subscribers that fall behind by more than the bus capacity skip the
//! missed messages, matching the best-effort semantics of Redis pub/sub.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::ports::{BrokerError, BrokerMessage, BrokerStream, MessageBroker};

const DEFAULT_CAPACITY: usize = 1024;

struct Inner {
    bus: broadcast::Sender<BrokerMessage>,
    /// Most recent messages, at most `history_limit`.
    published: Mutex<VecDeque<BrokerMessage>>,
    history_limit: usize,
    unavailable: AtomicBool,
}

/// In-memory pub/sub broker.
///
/// # Example
///
/// ```ignore
/// let broker = InMemoryBroker::new();
/// let mut stream = broker.subscribe(&["realtime:rfq"]).await?;
/// broker.publish("realtime:rfq", "{}").await?;
/// assert_eq!(stream.next().await.unwrap().payload, "{}");
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a broker whose subscribers may lag by at most `capacity`.
    ///
    /// The publish history keeps the same number of recent messages.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (bus, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                bus,
                published: Mutex::new(VecDeque::with_capacity(capacity)),
                history_limit: capacity,
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Simulates an outage: publish and subscribe fail while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::Release);
    }

    // === Test Helpers ===

    /// Returns the most recent published messages, oldest first.
    pub fn published(&self) -> Vec<BrokerMessage> {
        self.published_guard().iter().cloned().collect()
    }

    /// Returns recent payloads published to one channel.
    pub fn published_to(&self, channel: &str) -> Vec<String> {
        self.published_guard()
            .iter()
            .filter(|m| m.channel == channel)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.bus.receiver_count()
    }

    fn published_guard(&self) -> MutexGuard<'_, VecDeque<BrokerMessage>> {
        self.inner
            .published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), BrokerError> {
        if self.inner.unavailable.load(Ordering::Acquire) {
            return Err(BrokerError::Connection("in-memory broker marked unavailable".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError> {
        self.check_available()
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        let message = BrokerMessage::new(channel, payload);
        {
            let mut history = self.published_guard();
            if history.len() == self.inner.history_limit {
                history.pop_front();
            }
            history.push_back(message.clone());
        }
        // No receivers is not an error for pub/sub.
        Ok(self.inner.bus.send(message).unwrap_or(0))
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<BrokerStream, BrokerError> {
        self.check_available()
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let wanted: HashSet<String> = channels.iter().map(|c| c.to_string()).collect();
        let receiver = self.inner.bus.subscribe();

        let stream = futures::stream::unfold(
            (receiver, wanted),
            |(mut receiver, wanted)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) if wanted.contains(&message.channel) => {
                            return Some((message, (receiver, wanted)));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "In-memory broker subscriber lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn subscriber_receives_only_its_channels() {
        let broker = InMemoryBroker::new();
        let mut stream = broker.subscribe(&["realtime:rfq"]).await.unwrap();

        broker.publish("realtime:vessels", "skip").await.unwrap();
        broker.publish("realtime:rfq", "keep").await.unwrap();

        let message = stream.next().await.unwrap();
        assert_eq!(message, BrokerMessage::new("realtime:rfq", "keep"));
    }

    #[tokio::test]
    async fn clones_share_one_bus() {
        let a = InMemoryBroker::new();
        let b = a.clone();
        let mut stream = b.subscribe(&["realtime:general"]).await.unwrap();

        assert_eq!(a.publish("realtime:general", "x").await.unwrap(), 1);
        assert_eq!(stream.next().await.unwrap().payload, "x");
        assert_eq!(b.published_to("realtime:general"), vec!["x"]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let broker = InMemoryBroker::new();
        assert_eq!(broker.publish("realtime:general", "x").await.unwrap(), 0);
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn publish_history_keeps_only_recent_messages() {
        let broker = InMemoryBroker::with_capacity(3);
        for i in 0..10 {
            broker.publish("c", &i.to_string()).await.unwrap();
        }

        assert_eq!(broker.published_to("c"), vec!["7", "8", "9"]);
        assert_eq!(broker.published().len(), 3);
    }

    #[tokio::test]
    async fn unavailable_broker_fails_both_directions() {
        let broker = InMemoryBroker::new();
        broker.set_unavailable(true);

        assert!(matches!(
            broker.publish("realtime:general", "x").await,
            Err(BrokerError::Publish(_))
        ));
        assert!(matches!(
            broker.subscribe(&["realtime:general"]).await,
            Err(BrokerError::Subscribe(_))
        ));

        broker.set_unavailable(false);
        assert!(broker.publish("realtime:general", "x").await.is_ok());
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_and_continues() {
        let broker = InMemoryBroker::with_capacity(2);
        let mut stream = broker.subscribe(&["c"]).await.unwrap();
        for i in 0..5 {
            broker.publish("c", &i.to_string()).await.unwrap();
        }

        let first = stream.next().await.unwrap();
        assert_eq!(first.payload, "3");
        assert_eq!(stream.next().await.unwrap().payload, "4");
    }
}
