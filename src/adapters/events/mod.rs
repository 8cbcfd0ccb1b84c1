//! Event distribution adapters.
//!
//! - `FanoutManager` - Bridges the broker and the local hub
//! - `InMemoryBroker` - Process-local broker for tests and simulation
//! - `RedisBroker` - Redis pub/sub broker for multi-instance deployments

mod fanout;
mod in_memory;
mod redis;

pub use fanout::{ChannelCounters, FanoutManager, FanoutMode, FanoutStats};
pub use in_memory::InMemoryBroker;
pub use self::redis::RedisBroker;
