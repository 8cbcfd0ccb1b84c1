//! Broker channel partitioning.
//!
//! Every instance maps event types to channels with the same static table,
//! so an event published anywhere lands on the channel every instance
//! listens to.

use std::fmt;

use super::event::EventType;

/// Prefix shared by every broker channel name.
pub const CHANNEL_PREFIX: &str = "realtime:";

/// The fixed set of broker channels, one per business area plus a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BrokerChannel {
    PortCalls,
    Rfq,
    Notifications,
    Vessels,
    Webhooks,
    General,
}

impl BrokerChannel {
    /// All channels, in subscription order.
    pub const ALL: [BrokerChannel; 6] = [
        BrokerChannel::PortCalls,
        BrokerChannel::Rfq,
        BrokerChannel::Notifications,
        BrokerChannel::Vessels,
        BrokerChannel::Webhooks,
        BrokerChannel::General,
    ];

    /// Full channel name on the broker.
    pub fn name(&self) -> &'static str {
        match self {
            BrokerChannel::PortCalls => "realtime:port_calls",
            BrokerChannel::Rfq => "realtime:rfq",
            BrokerChannel::Notifications => "realtime:notifications",
            BrokerChannel::Vessels => "realtime:vessels",
            BrokerChannel::Webhooks => "realtime:webhooks",
            BrokerChannel::General => "realtime:general",
        }
    }

    /// Looks up a channel by its broker name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Channel for an event type, chosen by its namespace.
    pub fn for_event_type(event_type: &EventType) -> Self {
        match event_type.namespace() {
            "port_call" | "portcall" => BrokerChannel::PortCalls,
            "rfq" | "quote" => BrokerChannel::Rfq,
            "notification" => BrokerChannel::Notifications,
            "vessel" => BrokerChannel::Vessels,
            "webhook" => BrokerChannel::Webhooks,
            _ => BrokerChannel::General,
        }
    }

    /// Names of all channels, for subscribing.
    pub fn all_names() -> Vec<&'static str> {
        Self::ALL.iter().map(|c| c.name()).collect()
    }
}

impl fmt::Display for BrokerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_for(event_type: &str) -> BrokerChannel {
        BrokerChannel::for_event_type(&EventType::new(event_type).unwrap())
    }

    #[test]
    fn known_namespaces_map_to_their_channel() {
        assert_eq!(channel_for("port_call:status_changed"), BrokerChannel::PortCalls);
        assert_eq!(channel_for("portcall.created"), BrokerChannel::PortCalls);
        assert_eq!(channel_for("rfq:created"), BrokerChannel::Rfq);
        assert_eq!(channel_for("quote:submitted"), BrokerChannel::Rfq);
        assert_eq!(channel_for("notification:new"), BrokerChannel::Notifications);
        assert_eq!(channel_for("vessel:position"), BrokerChannel::Vessels);
        assert_eq!(channel_for("webhook:delivered"), BrokerChannel::Webhooks);
    }

    #[test]
    fn unknown_namespace_falls_back_to_general() {
        assert_eq!(channel_for("invoice:paid"), BrokerChannel::General);
        assert_eq!(channel_for("plain"), BrokerChannel::General);
    }

    #[test]
    fn names_are_prefixed_and_unique() {
        let names = BrokerChannel::all_names();
        assert_eq!(names.len(), BrokerChannel::ALL.len());
        for name in &names {
            assert!(name.starts_with(CHANNEL_PREFIX));
            assert_eq!(names.iter().filter(|n| n == &name).count(), 1);
        }
    }

    #[test]
    fn from_name_inverts_name() {
        for channel in BrokerChannel::ALL {
            assert_eq!(BrokerChannel::from_name(channel.name()), Some(channel));
        }
        assert_eq!(BrokerChannel::from_name("realtime:unknown"), None);
    }
}
