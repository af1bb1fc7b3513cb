//! Pipeline lifecycle state machine (§4.7). The transition table is the
//! single source of truth; the supervisor crate drives it but never
//! bypasses `PipelineState::transition`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Created,
    Running,
    Pausing,
    Paused,
    Resuming,
    Stopping,
    Stopped,
    Terminating,
    Terminated,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Stopped | PipelineState::Terminated | PipelineState::Failed
        )
    }

    /// Returns whether `self -> next` is a valid arrow in the §4.7 table.
    /// `Failed` is reachable from every non-terminal state (component
    /// errors can surface during any transitional phase).
    pub fn can_transition(self, next: PipelineState) -> bool {
        use PipelineState::*;
        if next == Failed && !self.is_terminal() {
            return true;
        }
        matches!(
            (self, next),
            (Created, Running)
                | (Running, Pausing)
                | (Running, Stopping)
                | (Running, Terminating)
                | (Pausing, Paused)
                | (Paused, Resuming)
                | (Paused, Stopping)
                | (Resuming, Running)
                | (Stopping, Stopped)
                | (Terminating, Terminated)
        )
    }

    pub fn transition(self, next: PipelineState) -> Result<PipelineState, TransitionError> {
        if self.can_transition(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid pipeline state transition: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: PipelineState,
    pub to: PipelineState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn created_to_running_is_valid() {
        assert!(Created.transition(Running).is_ok());
    }

    #[test]
    fn running_cannot_go_direct_to_stopped() {
        assert!(Running.transition(Stopped).is_err());
    }

    #[test]
    fn any_nonterminal_can_fail() {
        assert!(Pausing.transition(Failed).is_ok());
        assert!(Resuming.transition(Failed).is_ok());
    }

    #[test]
    fn terminal_states_reject_everything() {
        assert!(Stopped.transition(Running).is_err());
        assert!(Stopped.transition(Failed).is_err());
        assert!(Terminated.transition(Terminating).is_err());
    }

    #[test]
    fn full_pause_resume_cycle() {
        let mut s = Created;
        s = s.transition(Running).unwrap();
        s = s.transition(Pausing).unwrap();
        s = s.transition(Paused).unwrap();
        s = s.transition(Resuming).unwrap();
        s = s.transition(Running).unwrap();
        assert_eq!(s, Running);
    }
}
