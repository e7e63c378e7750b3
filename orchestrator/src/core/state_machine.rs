//! Run lifecycle state machine with an explicit adjacency table.
//!
//! Every run state change the orchestrator performs goes through
//! [`transition`]. A rejected edge is a programming error, never retried.

use thiserror::Error;

use crate::core::types::RunState;

/// Attempted an edge that is not in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid run transition {} -> {}", from.as_str(), to.as_str())]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

/// States reachable from `state` in a single validated transition.
///
/// Terminal states return an empty slice. No self-loops.
pub fn allowed_transitions(state: RunState) -> &'static [RunState] {
    match state {
        RunState::Created => &[RunState::Planned, RunState::Failed],
        RunState::Planned => &[RunState::Executing, RunState::Failed],
        RunState::Executing => &[RunState::Validating, RunState::Retrying, RunState::Failed],
        RunState::Validating => &[
            RunState::Completed,
            RunState::Retrying,
            RunState::HumanReview,
            RunState::Failed,
        ],
        RunState::Retrying => &[RunState::Executing, RunState::HumanReview, RunState::Failed],
        RunState::HumanReview => &[RunState::Executing, RunState::Failed, RunState::Completed],
        RunState::Completed | RunState::Failed => &[],
    }
}

pub fn can_transition(current: RunState, next: RunState) -> bool {
    allowed_transitions(current).contains(&next)
}

/// Validate the edge `current -> next` and return `next`.
pub fn transition(current: RunState, next: RunState) -> Result<RunState, InvalidTransition> {
    if !can_transition(current, next) {
        return Err(InvalidTransition {
            from: current,
            to: next,
        });
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [RunState; 8] = [
        RunState::Created,
        RunState::Planned,
        RunState::Executing,
        RunState::Validating,
        RunState::Retrying,
        RunState::HumanReview,
        RunState::Completed,
        RunState::Failed,
    ];

    /// Every pair in the adjacency table succeeds; every pair outside it
    /// fails with `InvalidTransition` naming both endpoints.
    #[test]
    fn transition_matches_adjacency_table() {
        for current in ALL_STATES {
            for next in ALL_STATES {
                let expected = allowed_transitions(current).contains(&next);
                match transition(current, next) {
                    Ok(state) => {
                        assert!(expected, "unexpected edge {current:?} -> {next:?}");
                        assert_eq!(state, next);
                    }
                    Err(err) => {
                        assert!(!expected, "missing edge {current:?} -> {next:?}");
                        assert_eq!(err, InvalidTransition { from: current, to: next });
                    }
                }
            }
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        assert!(allowed_transitions(RunState::Completed).is_empty());
        assert!(allowed_transitions(RunState::Failed).is_empty());
    }

    #[test]
    fn no_self_loops() {
        for state in ALL_STATES {
            assert!(!can_transition(state, state), "self loop on {state:?}");
        }
    }

    #[test]
    fn rejected_edge_names_both_states() {
        let err = transition(RunState::Created, RunState::Completed).unwrap_err();
        assert_eq!(err.to_string(), "invalid run transition CREATED -> COMPLETED");
    }
}
