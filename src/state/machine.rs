use super::error::{StateError, StateResult};
use super::{event::StateTransition, WorkerEvent, WorkerState};

#[derive(Debug)]
pub struct StateMachine {
    state: WorkerState,
    transition_history: Vec<StateTransition>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: WorkerState::default(),
            transition_history: Vec::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn can_transition(&self, event: WorkerEvent) -> bool {
        self.next_state(event).is_some()
    }

    pub fn next_state(&self, event: WorkerEvent) -> Option<WorkerState> {
        use WorkerEvent::*;
        match (self.state, event) {
            (WorkerState::Idle, Start) => Some(WorkerState::Running),
            (WorkerState::Idle, Cancel) => Some(WorkerState::Cancelled),
            (WorkerState::Running, Complete) => Some(WorkerState::Completed),
            (WorkerState::Running, Fail) => Some(WorkerState::Failed),
            (WorkerState::Running, Cancel) => Some(WorkerState::Cancelled),
            _ => None,
        }
    }

    pub fn transition(&mut self, event: WorkerEvent) -> StateResult<WorkerState> {
        tracing::debug!(from = ?self.state, event = ?event, "request worker transition");
        let next = self.next_state(event).ok_or_else(|| {
            let from = self.state;
            tracing::warn!(from = ?from, event = ?event, "invalid worker transition requested");
            StateError::InvalidStateTransition { from, event }
        })?;

        let record = StateTransition::new(Some(self.state), event, next);
        self.state = next;
        self.transition_history.push(record);

        Ok(self.state)
    }
}

#[cfg(test)]
impl StateMachine {
    fn history(&self) -> &[StateTransition] {
        &self.transition_history
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorkerState::{:?}", self.state)
    }
}
