//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `EventPublisher` - Hand events to the hub for distribution
//! - `MessageBroker` - Cross-instance pub/sub bus
//! - `SessionValidator` - Handshake token validation

mod event_publisher;
mod message_broker;
mod session_validator;

pub use event_publisher::EventPublisher;
pub use message_broker::{BrokerError, BrokerMessage, BrokerStream, MessageBroker};
pub use session_validator::SessionValidator;
