//! Session state machine.

use thiserror::Error;
use uuid::Uuid;

use planwright_db::models::SessionStatus;

#[derive(Debug, Clone, Error)]
#[error("invalid state transition: {from} -> {to} for session {session_id}")]
pub struct TransitionError {
    pub session_id: Uuid,
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// The session state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// pending             -> running
/// running             -> synthesizing
/// synthesizing        -> resolving_conflicts
/// resolving_conflicts -> running      (next round)
/// resolving_conflicts -> finalizing   (after the last round)
/// finalizing          -> completed
/// any non-terminal    -> failed
/// ```
pub struct SessionStateMachine;

impl SessionStateMachine {
    /// Check whether `from -> to` is an edge of the state graph.
    pub fn is_valid_transition(from: SessionStatus, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (from, to),
            (Pending, Running)
                | (Running, Synthesizing)
                | (Synthesizing, ResolvingConflicts)
                | (ResolvingConflicts, Running)
                | (ResolvingConflicts, Finalizing)
                | (Finalizing, Completed)
        ) || (to == Failed && !from.is_terminal())
    }

    /// Move `current` to `to`, rejecting edges not in the graph.
    ///
    /// Re-entering the current state is a no-op, which lets a resumed
    /// session repeat the transition into the phase it stopped in.
    pub fn transition(
        session_id: Uuid,
        current: &mut SessionStatus,
        to: SessionStatus,
    ) -> Result<(), TransitionError> {
        if *current == to && !to.is_terminal() {
            return Ok(());
        }
        if !Self::is_valid_transition(*current, to) {
            return Err(TransitionError {
                session_id,
                from: *current,
                to,
            });
        }
        tracing::debug!(session_id = %session_id, from = %current, to = %to, "session transition");
        *current = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::*;

    const ALL: [SessionStatus; 7] = [
        Pending,
        Running,
        Synthesizing,
        ResolvingConflicts,
        Finalizing,
        Completed,
        Failed,
    ];

    #[test]
    fn happy_path_edges_are_valid() {
        let path = [
            Pending,
            Running,
            Synthesizing,
            ResolvingConflicts,
            Running,
            Synthesizing,
            ResolvingConflicts,
            Finalizing,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                SessionStateMachine::is_valid_transition(pair[0], pair[1]),
                "{} -> {} should be valid",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn every_non_terminal_state_can_fail() {
        for from in ALL {
            assert_eq!(
                SessionStateMachine::is_valid_transition(from, Failed),
                !from.is_terminal(),
                "{from} -> failed"
            );
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for to in ALL {
            assert!(!SessionStateMachine::is_valid_transition(Completed, to));
            assert!(!SessionStateMachine::is_valid_transition(Failed, to));
        }
    }

    #[test]
    fn skipping_phases_is_rejected() {
        assert!(!SessionStateMachine::is_valid_transition(Running, ResolvingConflicts));
        assert!(!SessionStateMachine::is_valid_transition(Running, Finalizing));
        assert!(!SessionStateMachine::is_valid_transition(Pending, Completed));
    }

    #[test]
    fn transition_updates_status() {
        let id = Uuid::new_v4();
        let mut status = Pending;
        SessionStateMachine::transition(id, &mut status, Running).unwrap();
        assert_eq!(status, Running);
        SessionStateMachine::transition(id, &mut status, Running).unwrap();

        let err = SessionStateMachine::transition(id, &mut status, Completed).unwrap_err();
        assert_eq!(err.from, Running);
        assert_eq!(status, Running);
    }
}
