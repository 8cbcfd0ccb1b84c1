//! State machine trait for lifecycle enums.
//!
//! Lifecycle states are plain `Copy` enums; this trait gives them validated
//! transitions so that a terminal state can never be left.

use super::ValidationError;

/// Trait for status enums that represent state machines.
///
/// Implementors list the valid targets for each state and get a validated
/// `transition_to` for free.
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug + 'static {
    /// Returns all valid target states from the current state.
    fn valid_transitions(&self) -> &'static [Self];

    /// Returns true if transition from self to target is valid.
    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    /// Performs transition with validation, returning error if invalid.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "state_transition",
                format!("Cannot transition from {:?} to {:?}", self, target),
            ))
        }
    }

    /// Checks if current state is terminal (no valid outgoing transitions).
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}
