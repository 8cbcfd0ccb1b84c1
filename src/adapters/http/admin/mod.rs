//! HTTP adapter for the admin/control API.
//!
//! Internal callers only:
//! - `POST /admin/events` - Publish an event through the fanout
//! - `GET /admin/stats` - Hub and fanout counters
//! - `GET /admin/connections` - Active connections
//! - `DELETE /admin/users/:user_id/connections` - Force-disconnect a user
//! - `GET /health`, `GET /ready` - Probes

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{AdminApiError, AdminState};
pub use routes::{admin_routes, health_routes};
