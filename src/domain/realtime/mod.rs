//! Realtime module - the pure core of the hub.
//!
//! Nothing here performs I/O. The websocket and broker adapters drive these
//! types; keeping them pure lets the index invariants and routing rules be
//! tested without a runtime.

mod channel;
mod connection;
mod event;
mod index;
mod targeting;

pub use channel::{BrokerChannel, CHANNEL_PREFIX};
pub use connection::{ConnectionContext, ConnectionState};
pub use event::{EventType, RealtimeEvent, Topic, MAX_EVENT_TYPE_LEN, MAX_TOPIC_LEN};
pub use index::{ConnectionIndex, IndexEntry, IndexError};
pub use targeting::resolve_recipients;
