//! HTTP adapters - admin API, probes and router assembly.

pub mod admin;
pub mod app;
pub mod middleware;

pub use admin::{admin_routes, health_routes, AdminApiError, AdminState};
pub use app::{build_router, HttpSettings};
pub use middleware::{require_admin_key, AdminKey};
