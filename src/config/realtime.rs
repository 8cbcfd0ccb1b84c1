//! Connection and hub tuning

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Realtime hub tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Bounded mailbox size per connection
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Keepalive frame interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Silence after which a connection is evicted, in seconds
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// How often the staleness sweep runs, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Upper bound for a single transport write, in seconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Largest accepted client frame
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Hub command queue size
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,

    /// Time allowed for in-flight work after a shutdown signal, in seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl RealtimeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Validate realtime tuning
    pub fn validate(&self) -> Result<(), ValidationError> {
        let capacities = [
            ("realtime.mailbox_capacity", self.mailbox_capacity),
            ("realtime.command_queue_capacity", self.command_queue_capacity),
            ("realtime.max_message_bytes", self.max_message_bytes),
            (
                "realtime.max_subscriptions_per_connection",
                self.max_subscriptions_per_connection,
            ),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(ValidationError::ZeroCapacity(*name));
        }

        let intervals = [
            ("realtime.heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("realtime.sweep_interval_secs", self.sweep_interval_secs),
            ("realtime.write_timeout_secs", self.write_timeout_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ValidationError::InvalidTimeout(*name));
        }

        if self.stale_after_secs <= self.heartbeat_interval_secs {
            return Err(ValidationError::StaleThresholdTooShort);
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            stale_after_secs: default_stale_after(),
            sweep_interval_secs: default_sweep_interval(),
            write_timeout_secs: default_write_timeout(),
            max_message_bytes: default_max_message_bytes(),
            command_queue_capacity: default_command_queue_capacity(),
            max_subscriptions_per_connection: default_max_subscriptions(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_stale_after() -> u64 {
    90
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_write_timeout() -> u64 {
    10
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_command_queue_capacity() -> usize {
    1024
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_shutdown_grace() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RealtimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.stale_after(), Duration::from_secs(90));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.max_message_bytes, 65536);
    }

    #[test]
    fn test_stale_threshold_must_exceed_heartbeat() {
        let config = RealtimeConfig {
            heartbeat_interval_secs: 30,
            stale_after_secs: 30,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::StaleThresholdTooShort));
    }

    #[test]
    fn test_zero_capacity_names_the_field() {
        let config = RealtimeConfig {
            mailbox_capacity: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroCapacity("realtime.mailbox_capacity"))
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = RealtimeConfig {
            write_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidTimeout("realtime.write_timeout_secs"))
        );
    }
}
