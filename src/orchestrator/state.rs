//! Pipeline state machine.
//!
//! States and the table of allowed transitions. Every transition taken is
//! validated against the table and recorded in an append-only history;
//! anything outside the table is a programming error surfaced as
//! [`Error::InvalidTransition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Waiting for a task
    Idle,
    /// Expanding the task into requirements
    Expanding,
    /// Planning functions from requirements
    Decomposing,
    /// Implementing planned functions
    Generating,
    /// Checking generated code
    Validating,
    /// Paused by the user; prior state saved for resume
    Paused,
    /// Checkpoint waiting for user input
    AwaitingDecision,
    /// Pipeline finished successfully
    Completed,
    /// Pipeline failed
    Error,
}

impl PipelineState {
    /// States that actively process work.
    pub fn is_execution_phase(&self) -> bool {
        matches!(
            self,
            Self::Expanding | Self::Decomposing | Self::Generating | Self::Validating
        )
    }

    /// Whether the pair `(self, to)` is in the transition table.
    pub fn can_transition(&self, to: PipelineState) -> bool {
        use PipelineState::*;
        match self {
            Idle => matches!(to, Expanding),
            Expanding => matches!(to, Decomposing | Paused | AwaitingDecision | Error),
            Decomposing => matches!(to, Generating | Paused | AwaitingDecision | Error),
            Generating => matches!(to, Validating | Completed | Paused | AwaitingDecision | Error),
            Validating => matches!(
                to,
                Completed | Generating | Paused | AwaitingDecision | Error
            ),
            Paused => to.is_execution_phase() || matches!(to, Idle),
            AwaitingDecision => to.is_execution_phase() || matches!(to, Paused | Idle),
            Completed => matches!(to, Idle),
            Error => matches!(to, Idle),
        }
    }

    /// Friendly phase name for display.
    pub fn phase_name(&self) -> &'static str {
        match self {
            Self::Idle => "Waiting",
            Self::Expanding => "Expanding Requirements",
            Self::Decomposing => "Planning Functions",
            Self::Generating => "Generating Code",
            Self::Validating => "Validating",
            Self::Paused => "Paused",
            Self::AwaitingDecision => "Awaiting Decision",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Expanding => "expanding",
            Self::Decomposing => "decomposing",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Paused => "paused",
            Self::AwaitingDecision => "awaiting_decision",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Full orchestrator state: current/prior state, task metadata, timestamps,
/// and the append-only transition history.
#[derive(Debug, Clone)]
pub struct OrchestratorState {
    current: PipelineState,
    /// Saved when pausing, restored on resume
    previous: Option<PipelineState>,
    pub task: String,
    /// e.g. "function 3 of 5"
    pub phase_detail: String,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    history: Vec<StateTransition>,
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorState {
    pub fn new() -> Self {
        Self {
            current: PipelineState::Idle,
            previous: None,
            task: String::new(),
            phase_detail: String::new(),
            error_message: None,
            started_at: None,
            completed_at: None,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    /// Perform a transition, rejecting pairs outside the table.
    ///
    /// On entering `Paused` from an execution phase the prior state is
    /// saved. The first execution phase stamps `started_at`; `Completed`
    /// stamps `completed_at`.
    pub fn transition(&mut self, to: PipelineState, reason: impl Into<String>) -> Result<()> {
        if !self.current.can_transition(to) {
            return Err(Error::invalid_transition(
                self.current.to_string(),
                to.to_string(),
            ));
        }

        self.history.push(StateTransition {
            from: self.current,
            to,
            reason: reason.into(),
            timestamp: Utc::now(),
        });

        if to == PipelineState::Paused {
            self.previous = Some(self.current);
        }

        if to.is_execution_phase() && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        } else if to == PipelineState::Completed {
            self.completed_at = Some(Utc::now());
        }

        self.current = to;
        Ok(())
    }

    /// State to restore on resume, when paused.
    pub fn resume_state(&self) -> Option<PipelineState> {
        if self.current == PipelineState::Paused {
            self.previous
        } else {
            None
        }
    }

    pub fn is_running(&self) -> bool {
        self.current.is_execution_phase()
    }

    pub fn is_pausable(&self) -> bool {
        self.current.is_execution_phase() || self.current == PipelineState::AwaitingDecision
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.current,
            PipelineState::Completed | PipelineState::Error | PipelineState::Idle
        )
    }

    /// Reset for a new task. The transition history is kept for analysis.
    pub fn reset(&mut self) {
        self.current = PipelineState::Idle;
        self.previous = None;
        self.task.clear();
        self.phase_detail.clear();
        self.error_message = None;
        self.started_at = None;
        self.completed_at = None;
    }

    /// Seconds since the first execution phase, up to completion.
    pub fn elapsed_seconds(&self) -> f64 {
        match self.started_at {
            None => 0.0,
            Some(started) => {
                let end = self.completed_at.unwrap_or_else(Utc::now);
                (end - started).num_milliseconds() as f64 / 1000.0
            }
        }
    }

    /// Append-only transition history.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = OrchestratorState::new();
        for (to, _) in [
            (Expanding, ""),
            (Decomposing, ""),
            (Generating, ""),
            (Validating, ""),
            (Completed, ""),
            (Idle, ""),
        ] {
            state.transition(to, "step").unwrap();
        }
        assert_eq!(state.current(), Idle);
        assert_eq!(state.history().len(), 6);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut state = OrchestratorState::new();
        let err = state.transition(Generating, "skip ahead").unwrap_err();
        assert!(matches!(err, super::Error::InvalidTransition { .. }));
        // Rejected transitions are not recorded
        assert!(state.history().is_empty());
        assert_eq!(state.current(), Idle);
    }

    #[test]
    fn test_every_recorded_transition_is_in_table() {
        let mut state = OrchestratorState::new();
        state.transition(Expanding, "").unwrap();
        state.transition(Paused, "").unwrap();
        state.transition(Expanding, "").unwrap();
        state.transition(Decomposing, "").unwrap();
        state.transition(Error, "").unwrap();
        state.transition(Idle, "").unwrap();

        for t in state.history() {
            assert!(t.from.can_transition(t.to), "{} -> {}", t.from, t.to);
        }
    }

    #[test]
    fn test_pause_saves_prior_state_for_resume() {
        let mut state = OrchestratorState::new();
        state.transition(Expanding, "").unwrap();
        state.transition(Decomposing, "").unwrap();
        state.transition(Paused, "user pause").unwrap();

        assert_eq!(state.resume_state(), Some(Decomposing));
        state.transition(Decomposing, "resume").unwrap();
        assert_eq!(state.resume_state(), None);
    }

    #[test]
    fn test_validating_can_loop_back_to_generating() {
        let mut state = OrchestratorState::new();
        state.transition(Expanding, "").unwrap();
        state.transition(Decomposing, "").unwrap();
        state.transition(Generating, "").unwrap();
        state.transition(Validating, "").unwrap();
        state.transition(Generating, "retry").unwrap();
        assert_eq!(state.current(), Generating);
    }

    #[test]
    fn test_generating_straight_to_completed() {
        // Empty plan: no validation pass needed
        let mut state = OrchestratorState::new();
        state.transition(Expanding, "").unwrap();
        state.transition(Decomposing, "").unwrap();
        state.transition(Generating, "").unwrap();
        state.transition(Completed, "nothing to validate").unwrap();
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn test_timestamps_stamped_once() {
        let mut state = OrchestratorState::new();
        assert!(state.started_at.is_none());
        state.transition(Expanding, "").unwrap();
        let started = state.started_at.expect("stamped on first phase");
        state.transition(Decomposing, "").unwrap();
        assert_eq!(state.started_at, Some(started));
    }

    #[test]
    fn test_reset_keeps_history() {
        let mut state = OrchestratorState::new();
        state.task = "build a parser".to_string();
        state.transition(Expanding, "").unwrap();
        state.transition(Error, "boom").unwrap();
        state.transition(Idle, "reset").unwrap();
        state.reset();

        assert_eq!(state.current(), Idle);
        assert!(state.task.is_empty());
        assert_eq!(state.history().len(), 3);
    }

    #[test]
    fn test_awaiting_decision_edges() {
        let mut state = OrchestratorState::new();
        state.transition(Expanding, "").unwrap();
        state.transition(AwaitingDecision, "checkpoint").unwrap();
        state.transition(Generating, "decision made").unwrap();
        assert_eq!(state.current(), Generating);
    }
}
