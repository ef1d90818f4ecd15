use super::model::WorkerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    Start,
    Complete,
    Fail,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: Option<WorkerState>,
    pub event: WorkerEvent,
    pub to: WorkerState,
}

impl StateTransition {
    pub const fn new(from: Option<WorkerState>, event: WorkerEvent, to: WorkerState) -> Self {
        Self { from, event, to }
    }
}
