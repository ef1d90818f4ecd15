use super::event::WorkerEvent;
use super::model::WorkerState;
use thiserror::Error;

pub type StateResult<T> = std::result::Result<T, StateError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("invalid worker transition: from {from:?} using event {event:?}")]
    InvalidStateTransition {
        from: WorkerState,
        event: WorkerEvent,
    },
}
