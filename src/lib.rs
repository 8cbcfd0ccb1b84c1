//! Realtime Hub - connection hub with distributed event fanout.
//!
//! Clients hold persistent WebSocket connections and receive domain events
//! routed by user, organization, workspace and topic. Events published on any
//! instance reach matching clients on every instance through a pub/sub broker.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
