use thiserror::Error;

use crate::lifecycle::{LifecycleEvent, LifecycleState};

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Failures of the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// No event path leads from `from` to `to`.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// `event` cannot be applied while the lifecycle is in `state`.
    #[error("Invalid event {event} while in state {state}")]
    InvalidEventForState {
        state: LifecycleState,
        event: LifecycleEvent,
    },
}

/// Failures of control-loop setup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("a control loop is already installed on thread {thread}")]
    AlreadyInstalled { thread: String },
}
