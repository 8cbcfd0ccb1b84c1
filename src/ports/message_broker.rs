//! MessageBroker port - Interface for the cross-instance pub/sub bus.
//!
//! Every hub instance publishes events to a broker channel and listens on
//! all channels, so an event accepted by any instance reaches connections
//! held by every instance.
//!
//! ```text
//!   instance A ──publish──►  realtime:rfq  ──►  instance A (own subscriber)
//!                                           └─►  instance B
//! ```
//!
//! The broker carries opaque strings. Encoding and decoding of events is
//! the caller's concern.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// A message received from a broker channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

impl BrokerMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of messages from a subscription. Ends when the broker connection
/// is lost.
pub type BrokerStream = Pin<Box<dyn Stream<Item = BrokerMessage> + Send>>;

/// Errors that can occur in broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Could not reach the broker
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// Publish was rejected or failed mid-flight
    #[error("Broker publish error: {0}")]
    Publish(String),

    /// Subscription could not be established
    #[error("Broker subscribe error: {0}")]
    Subscribe(String),
}

/// Port for a pub/sub message broker.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a payload to a channel.
    ///
    /// Returns the number of subscribers that received it, where the
    /// broker reports one.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError>;

    /// Subscribe to a set of channels.
    async fn subscribe(&self, channels: &[&str]) -> Result<BrokerStream, BrokerError>;

    /// Short adapter name for logs and stats.
    fn name(&self) -> &'static str;
}
