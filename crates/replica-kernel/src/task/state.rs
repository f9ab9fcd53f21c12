use crate::error::TaskError;
use serde::{Deserialize, Serialize};

/// Lifecycle of a replicate task
///
/// `Created -> Isolated -> Planted -> Initialized -> Ran -> {Exited | Failed}`.
/// A task is reused across rounds: `Exited` and `Failed` return to
/// `Isolated` when the next round rebinds its sandbox. Loading a snapshot
/// moves `Isolated` straight to `Initialized`, and a failed task may be
/// re-initialized within the same round (ensemble members restart it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Assembled, never bound
    Created,
    /// Sandbox and flags bound for this round
    Isolated,
    /// Seed bound, model not yet initialized
    Planted,
    /// Model initialized from parameters or a snapshot
    Initialized,
    /// Model advanced at least once
    Ran,
    /// Round finished normally
    Exited,
    /// Round ended with an error
    Failed,
}

/// Validates a state transition.
///
/// Illegal transitions panic with the `strict-debug` feature; otherwise they
/// are reported as [`TaskError::IllegalTransition`].
pub fn validate_transition(from: TaskState, to: TaskState) -> Result<(), TaskError> {
    if allowed(from, to) {
        Ok(())
    } else {
        #[cfg(feature = "strict-debug")]
        panic!("Illegal task transition attempted: {:?} -> {:?}", from, to);

        Err(TaskError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
pub fn allowed_transitions(from: TaskState) -> Vec<TaskState> {
    use TaskState::*;
    match from {
        Created => vec![Isolated, Failed],
        Isolated => vec![Isolated, Planted, Initialized, Exited, Failed],
        Planted => vec![Isolated, Planted, Initialized, Exited, Failed],
        Initialized => vec![Initialized, Ran, Exited, Failed],
        Ran => vec![Initialized, Ran, Exited, Failed],
        Exited => vec![Isolated],
        Failed => vec![Isolated, Initialized, Exited],
    }
}

/// State after planting a seed in `from`, if planting is allowed there.
///
/// Planting before `init` advances to `Planted`; planting an initialized
/// task only rebinds the seed.
pub fn plant_target(from: TaskState) -> Option<TaskState> {
    use TaskState::*;
    match from {
        Isolated | Planted => Some(Planted),
        Initialized | Ran => Some(from),
        Created | Exited | Failed => None,
    }
}

fn allowed(from: TaskState, to: TaskState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
