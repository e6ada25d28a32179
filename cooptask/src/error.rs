use crate::task::{OwnerId, TaskId, TaskState};

/// A centralized error type for all scheduler operations.
///
/// Misconfigured references never silently drop work: every submission API
/// returns one of these instead.
#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("Owner {0} is not registered")]
    UnknownOwner(OwnerId),

    #[error("Task {task} not found on owner {owner}")]
    UnknownTask { owner: OwnerId, task: TaskId },

    /// Only pending tasks can be promoted to live.
    #[error("Task {task} is {state}, expected a pending task")]
    TaskNotPending { task: TaskId, state: TaskState },

    #[error("Task {task} already exists on owner {owner}")]
    DuplicateTask { owner: OwnerId, task: TaskId },

    /// Iteration lists must be a sequence or a keyed mapping.
    #[error("Task {task} iterates over a value that is neither an array nor an object")]
    NotIterable { task: TaskId },

    #[error("Scheduler was shut down")]
    ShutDown,

    /// Internal bookkeeping is inconsistent. Only surfaced when the scheduler
    /// runs with `InvariantPolicy::LogAndSkip`.
    #[error("FATAL: scheduler invariant violated: {0}")]
    InvariantViolation(String),

    /// A catch-all for any other type of unexpected error.
    #[error("An unexpected error occurred: {0}")]
    Other(#[from] anyhow::Error),
}

impl SchedulerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchedulerError::UnknownOwner(_) | SchedulerError::UnknownTask { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedulerError::InvariantViolation(_))
    }
}
