//! WebSocket adapters for realtime event delivery.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          FanoutManager                               │
//! │   broker subscription ──► decode ──► HubHandle::broadcast            │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Hub (single task)                             │
//! │   ConnectionIndex: by user / organization / workspace / topic        │
//! │   resolve_recipients ──► try_send into bounded mailboxes             │
//! └─────────────────────────────────────────────────────────────────────┘
//!            │                        │                        │
//!            ▼                        ▼                        ▼
//!     mailbox C1 → pump        mailbox C2 → pump        mailbox C3 → pump
//! ```
//!
//! # Components
//!
//! - [`connection`] - Shared per-connection state and disconnect reasons
//! - [`messages`] - WebSocket message protocol types
//! - [`hub`] - The coordination task and its handle
//! - [`handler`] - Axum WebSocket upgrade handler and pumps
//! - [`sweeper`] - Stale connection eviction

pub mod connection;
pub mod handler;
pub mod hub;
pub mod messages;
pub mod sweeper;

pub use connection::{ConnectionHandle, ConnectionInfo, DisconnectReason};
pub use handler::{
    resolve_identity, run_inbound, run_outbound, websocket_router, ws_handler, ConnectionSettings,
    HandshakeError, HandshakeParams, IdentitySources, RealtimeState,
};
pub use hub::{
    BroadcastReport, Hub, HubCommand, HubConfig, HubError, HubHandle, HubStats, Mailbox,
};
pub use messages::{ClientMessage, ProtocolError, ServerMessage};
pub use sweeper::{StaleSweeper, SweeperConfig};
