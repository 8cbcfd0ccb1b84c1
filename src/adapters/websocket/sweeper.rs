//! StaleSweeper - Background service that evicts silent connections.
//!
//! A connection whose transport never errors (half-open TCP, a suspended
//! laptop) would otherwise hold a slot forever. The sweeper periodically asks
//! the hub to drop every connection that has sent nothing for longer than
//! the staleness threshold.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 30s | How often to sweep |
//! | `stale_after` | 90s | Silence before a connection is evicted |
//!
//! Each heartbeat carries a transport ping, and the client's pong counts as
//! activity. The threshold must exceed the heartbeat interval, otherwise a
//! client that only listens is evicted between two pongs.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::config::RealtimeConfig;

use super::hub::{HubError, HubHandle};

/// Configuration for the StaleSweeper service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub stale_after: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(90),
        }
    }
}

impl From<&RealtimeConfig> for SweeperConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            interval: config.sweep_interval(),
            stale_after: config.stale_after(),
        }
    }
}

/// Background service that evicts stale connections.
pub struct StaleSweeper {
    hub: HubHandle,
    config: SweeperConfig,
}

impl StaleSweeper {
    pub fn new(hub: HubHandle, config: SweeperConfig) -> Self {
        Self { hub, config }
    }

    /// Run the sweep loop until shutdown is signalled or the hub stops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can be stale yet.
        interval.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Stale sweeper stopping");
                        return;
                    }
                }
                _ = interval.tick() => {
                    if let Err(HubError::Unavailable) = self.sweep_once().await {
                        tracing::debug!("Hub stopped, stale sweeper exiting");
                        return;
                    }
                }
            }
        }
    }

    /// Runs a single sweep and returns how many connections were evicted.
    pub async fn sweep_once(&self) -> Result<usize, HubError> {
        let evicted = self.hub.evict_stale(self.config.stale_after).await?;
        if evicted > 0 {
            tracing::warn!(
                evicted,
                stale_after_secs = self.config.stale_after.as_secs(),
                "Evicted stale connections"
            );
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::websocket::connection::ConnectionHandle;
    use crate::adapters::websocket::hub::{Hub, HubConfig};
    use crate::domain::foundation::{ConnectionId, Timestamp, UserId};
    use crate::domain::realtime::{ConnectionContext, ConnectionState};
    use std::sync::Arc;

    async fn connection(hub: &HubHandle) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(
            ConnectionId::new(),
            ConnectionContext::new(UserId::new("u1").unwrap()),
        ));
        // The mailbox is dropped; eviction doesn't depend on it.
        let _ = hub.register(handle.clone()).await.unwrap();
        handle
    }

    #[tokio::test]
    async fn sweep_once_evicts_silent_connections() {
        let (_tx, rx) = watch::channel(false);
        let (hub, _task) = Hub::spawn(HubConfig::default(), rx);
        let stale = connection(&hub).await;
        let fresh = connection(&hub).await;
        stale.set_last_seen(Timestamp::now().minus(Duration::from_secs(600)));

        let sweeper = StaleSweeper::new(hub.clone(), SweeperConfig::default());
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        assert_eq!(stale.state(), ConnectionState::Disconnected);
        assert_eq!(fresh.state(), ConnectionState::Connected);
        assert_eq!(hub.stats().await.stale_evictions, 1);
    }

    #[tokio::test]
    async fn run_sweeps_on_interval_and_stops_on_shutdown() {
        let (hub_tx, hub_rx) = watch::channel(false);
        let (hub, _task) = Hub::spawn(HubConfig::default(), hub_rx);
        let stale = connection(&hub).await;
        stale.set_last_seen(Timestamp::now().minus(Duration::from_secs(600)));

        let sweeper = StaleSweeper::new(
            hub.clone(),
            SweeperConfig {
                interval: Duration::from_millis(10),
                stale_after: Duration::from_secs(90),
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stale.state(), ConnectionState::Disconnected);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        drop(hub_tx);
    }

    #[tokio::test]
    async fn run_exits_when_hub_stops() {
        let (hub_tx, hub_rx) = watch::channel(false);
        let (hub, hub_task) = Hub::spawn(HubConfig::default(), hub_rx);
        hub_tx.send(true).unwrap();
        hub_task.await.unwrap();

        let sweeper = StaleSweeper::new(
            hub,
            SweeperConfig {
                interval: Duration::from_millis(5),
                stale_after: Duration::from_secs(90),
            },
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::time::timeout(Duration::from_secs(1), sweeper.run(shutdown_rx))
            .await
            .unwrap();
    }
}
