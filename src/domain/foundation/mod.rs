//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers and error types that form the
//! vocabulary of the realtime hub.

mod auth;
mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use auth::{AuthError, AuthenticatedUser};
pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{ConnectionId, EventId, OrganizationId, UserId, WorkspaceId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
