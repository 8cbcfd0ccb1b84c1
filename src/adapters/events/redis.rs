//! Redis pub/sub message broker for multi-instance deployments.
//!
//! Publishing goes through a shared multiplexed connection. Each subscription
//! opens its own dedicated connection, since a Redis connection in subscribe
//! mode cannot issue other commands.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::ports::{BrokerError, BrokerMessage, BrokerStream, MessageBroker};

/// Redis-backed broker.
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
    timeout: Duration,
}

impl RedisBroker {
    /// Opens the client and the publishing connection.
    ///
    /// Fails if Redis is unreachable within `timeout`; callers treat that as
    /// degraded mode rather than a fatal error.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(url).map_err(|e| BrokerError::Connection(e.to_string()))?;

        let conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| BrokerError::Connection(format!("timed out after {:?}", timeout)))?
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            conn,
            timeout,
        })
    }
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();

        let receivers: i64 = tokio::time::timeout(self.timeout, conn.publish(channel, payload))
            .await
            .map_err(|_| BrokerError::Publish(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e: redis::RedisError| BrokerError::Publish(e.to_string()))?;

        Ok(receivers.max(0) as usize)
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<BrokerStream, BrokerError> {
        let conn = tokio::time::timeout(self.timeout, self.client.get_async_connection())
            .await
            .map_err(|_| BrokerError::Subscribe(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let mut pubsub = conn.into_pubsub();
        for channel in channels {
            pubsub
                .subscribe(*channel)
                .await
                .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        }

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(payload) => Some(BrokerMessage::new(channel, payload)),
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Dropping non-text broker payload");
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
