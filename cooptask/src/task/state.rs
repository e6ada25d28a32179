use std::fmt;

/// Lifecycle of a task.
///
/// ```text
/// PENDING -> ACTIVE -> COMPLETE
/// PENDING | ACTIVE -> CANCELLED
/// PENDING | ACTIVE -> PAUSED -> PENDING
/// ```
///
/// `Complete` and `Cancelled` are terminal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    #[default]
    Pending,
    Active,
    Paused,
    Complete,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Cancelled)
    }

    /// Iteration chunks only make progress while the task is in one of these.
    pub(crate) fn can_progress(&self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Active)
    }

    /// Returns false if the task already ran (or is running) and must not
    /// execute its body again.
    pub(crate) fn transition_to_active(&mut self) -> bool {
        match self {
            TaskState::Pending => {
                *self = TaskState::Active;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn transition_to_complete(&mut self) {
        debug_assert_eq!(*self, TaskState::Active, "only an active task completes");
        *self = TaskState::Complete;
    }

    pub(crate) fn transition_to_paused(&mut self) -> bool {
        match self {
            TaskState::Pending | TaskState::Active => {
                *self = TaskState::Paused;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn transition_to_pending(&mut self) -> bool {
        match self {
            TaskState::Paused => {
                *self = TaskState::Pending;
                true
            }
            _ => false,
        }
    }

    /// Forces `Cancelled` unless the task already completed.
    pub(crate) fn transition_to_cancelled(&mut self) {
        if *self != TaskState::Complete {
            *self = TaskState::Cancelled;
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::Paused => "paused",
            TaskState::Complete => "complete",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_happy_path() {
        let mut state = TaskState::default();
        assert!(state.transition_to_active());
        state.transition_to_complete();
        assert!(state.is_terminal());
    }

    #[rstest]
    #[case::active(TaskState::Active)]
    #[case::complete(TaskState::Complete)]
    #[case::cancelled(TaskState::Cancelled)]
    #[case::paused(TaskState::Paused)]
    fn test_activate_only_from_pending(#[case] state: TaskState) {
        let mut state = state;
        let before = state;
        assert!(!state.transition_to_active());
        assert_eq!(state, before);
    }

    #[test]
    fn test_pause_then_resume_returns_to_pending() {
        let mut state = TaskState::Pending;
        assert!(state.transition_to_paused());
        assert_eq!(state, TaskState::Paused);
        assert!(!state.can_progress());

        assert!(state.transition_to_pending());
        assert_eq!(state, TaskState::Pending);
        assert!(!state.is_terminal());
    }

    #[rstest]
    #[case::complete(TaskState::Complete, false)]
    #[case::cancelled(TaskState::Cancelled, false)]
    #[case::paused(TaskState::Paused, false)]
    #[case::active(TaskState::Active, true)]
    fn test_pause(#[case] state: TaskState, #[case] expected: bool) {
        let mut state = state;
        assert_eq!(state.transition_to_paused(), expected);
    }

    #[rstest]
    #[case::pending(TaskState::Pending, TaskState::Cancelled)]
    #[case::active(TaskState::Active, TaskState::Cancelled)]
    #[case::paused(TaskState::Paused, TaskState::Cancelled)]
    #[case::complete(TaskState::Complete, TaskState::Complete)]
    fn test_cancel(#[case] state: TaskState, #[case] expected: TaskState) {
        let mut state = state;
        state.transition_to_cancelled();
        assert_eq!(state, expected);
    }
}
