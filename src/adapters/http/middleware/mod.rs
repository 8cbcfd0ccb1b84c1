//! HTTP middleware for axum.
//!
//! - `admin_auth` - Static API key guard for the admin API

pub mod admin_auth;

pub use admin_auth::{require_admin_key, AdminAuthRejection, AdminKey, ADMIN_KEY_HEADER};
