use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

// Public API
pub mod id;
pub use self::id::{OwnerId, TaskId, try_id};

mod state;
pub use self::state::TaskState;

pub mod iteration;
pub use self::iteration::{Element, IterateSpec, IterationTask, IterationType, Iteratee, Key};

pub mod spec;
pub use self::spec::{NewTask, TaskSpec};

#[allow(clippy::module_inception)]
pub mod task;
pub use self::task::Task;

// Re-exports
mod header;
pub(crate) use self::header::Header;

/// Default execution context of a task. Every owner carries one (its
/// "origin") and a task may override it. Bodies reach it through
/// [`Invocation::context`] and downcast to the concrete host type.
pub type Origin = Rc<dyn Any>;

/// Body of a plain [`Task`].
pub type TaskFn = Box<dyn FnMut(&Invocation<'_>) -> Value>;

/// Invoked once with the task result after the owner recorded completion.
pub type TaskCallback = Box<dyn FnOnce(&Value)>;

/// Everything a task body is called with.
pub struct Invocation<'a> {
    task_id: &'a TaskId,
    context: &'a Origin,
    arguments: &'a [Value],
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(task_id: &'a TaskId, context: &'a Origin, arguments: &'a [Value]) -> Self {
        Self {
            task_id,
            context,
            arguments,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        self.task_id
    }

    /// The task's context override, or its owner's origin.
    pub fn context(&self) -> &Origin {
        self.context
    }

    pub fn context_as<T: 'static>(&self) -> Option<&T> {
        self.context.downcast_ref::<T>()
    }

    pub fn arguments(&self) -> &[Value] {
        self.arguments
    }

    pub fn arg(&self, idx: usize) -> Option<&Value> {
        self.arguments.get(idx)
    }
}

impl fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("task_id", self.task_id)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

/// Outcome of handing a task one turn of execution. The scheduler turns this
/// into the continuation: record completion, schedule the next dispatch pass
/// or queue a resume turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The body finished during this call. Carries the final result.
    Complete(Value),

    /// Chunked work suspended itself and wants another turn.
    Yield,

    /// The task was already active or complete, nothing ran. Carries whatever
    /// result was cached so far.
    Cached(Option<Value>),

    /// The task was paused or cancelled between two chunks and stopped making
    /// progress. Partial results are kept.
    Halted,
}

/// How long a single call to [`Executable::execute`] may run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Yield back to the scheduler at every suspension point.
    #[default]
    Turn,

    /// Run to completion in the caller's stack frame, ignoring suspension
    /// points. Used by immediate `require_task`.
    Inline,
}

/// Capability shared by every kind of task the scheduler can run.
pub trait Executable: fmt::Debug {
    fn id(&self) -> &TaskId;

    fn state(&self) -> TaskState;

    /// Only eligible while its owner is the active owner.
    fn is_active_only(&self) -> bool;

    /// Last computed value. `None` until something was computed.
    fn result(&self) -> Option<&Value>;

    /// Starts the task. Executing an active or complete task is a no-op that
    /// returns [`Step::Cached`].
    fn execute(&mut self, origin: &Origin, mode: ExecMode) -> Step;

    /// Continues a task that previously returned [`Step::Yield`].
    fn resume(&mut self, _mode: ExecMode) -> Step {
        Step::Cached(self.result().cloned())
    }

    fn take_callback(&mut self) -> Option<TaskCallback>;

    /// Moves the task to `Paused`. Returns false if it already completed or
    /// was cancelled.
    fn pause(&mut self) -> bool;

    /// Moves a paused task back to `Pending`.
    fn unpause(&mut self) -> bool;

    /// Forces `Cancelled` unless complete and releases everything the task
    /// holds on to. Idempotent.
    fn destroy(&mut self);

    fn is_complete(&self) -> bool {
        self.state() == TaskState::Complete
    }

    /// Short label for diagnostics.
    fn kind(&self) -> &'static str;
}
