//! Run state tracking with transition checks.

use crate::errors::{ResearchError, Result};
use crate::observability::RunObserver;
use crate::run::RunState;

/// Tracks the current state of one run and every state it visited.
pub(crate) struct RunStateMachine<'a> {
    run_id: &'a str,
    state: RunState,
    history: Vec<RunState>,
    observer: &'a dyn RunObserver,
}

impl<'a> RunStateMachine<'a> {
    pub(crate) fn new(run_id: &'a str, observer: &'a dyn RunObserver) -> Self {
        Self {
            run_id,
            state: RunState::Idle,
            history: vec![RunState::Idle],
            observer,
        }
    }

    pub(crate) fn state(&self) -> RunState {
        self.state
    }

    /// Moves to `next`, failing with `Internal` on an unlisted transition.
    pub(crate) fn transition(&mut self, next: RunState) -> Result<()> {
        let from = self.state;
        if !from.can_transition_to(next) {
            tracing::error!(run_id = self.run_id, from = %from, to = %next, "Illegal run transition");
            return Err(ResearchError::Internal(format!(
                "illegal run transition {from} -> {next}"
            )));
        }
        self.state = next;
        self.history.push(next);
        tracing::debug!(run_id = self.run_id, from = %from, to = %next, "Run transition");
        self.observer.on_state_change(self.run_id, from, next);
        Ok(())
    }

    pub(crate) fn into_history(self) -> Vec<RunState> {
        self.history
    }
}
