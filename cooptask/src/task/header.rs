use crate::task::{Origin, TaskCallback, TaskId, TaskState};
use serde_json::Value;
use std::fmt;

/// Fields shared by every task flavor.
pub(crate) struct Header {
    pub(crate) id: TaskId,

    pub(crate) state: TaskState,

    pub(crate) active_only: bool,

    /// Overrides the owner's origin when set.
    pub(crate) context: Option<Origin>,

    pub(crate) callback: Option<TaskCallback>,

    pub(crate) result: Option<Value>,
}

impl Header {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            state: TaskState::default(),
            active_only: false,
            context: None,
            callback: None,
            result: None,
        }
    }

    pub(crate) fn pause(&mut self) -> bool {
        self.state.transition_to_paused()
    }

    pub(crate) fn unpause(&mut self) -> bool {
        self.state.transition_to_pending()
    }

    /// Cancels unless complete and drops references so closures and values
    /// captured by the task can be reclaimed.
    pub(crate) fn destroy(&mut self) {
        self.state.transition_to_cancelled();
        self.context = None;
        self.callback = None;
        self.result = None;
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("active_only", &self.active_only)
            .field("has_context", &self.context.is_some())
            .field("has_callback", &self.callback.is_some())
            .field("result", &self.result)
            .finish()
    }
}
