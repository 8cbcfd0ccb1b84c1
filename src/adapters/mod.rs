//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the realtime core to external systems:
//! - `websocket` - Client connections, the hub task and its pumps
//! - `events` - Broker implementations and the fanout bridge
//! - `auth` - Session token validators
//! - `http` - Admin API, probes and router assembly

pub mod auth;
pub mod events;
pub mod http;
pub mod websocket;

pub use auth::{JwtSessionValidator, MockSessionValidator};
pub use events::{FanoutManager, InMemoryBroker, RedisBroker};
pub use websocket::{Hub, HubHandle};
