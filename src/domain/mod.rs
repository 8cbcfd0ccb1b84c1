//! Domain layer containing the realtime model.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors, state machine)
//! - `realtime` - Events, connection context, the connection index and targeting rules

pub mod foundation;
pub mod realtime;
