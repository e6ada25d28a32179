use crate::error::SchedulerError;
use crate::task::iteration::DEFAULT_STEP;
use crate::task::{
    Executable, Header, Invocation, IterateSpec, IterationTask, Origin, Task, TaskFn, TaskId,
};
use serde_json::Value;
use std::fmt;
use std::num::NonZeroUsize;

enum Body {
    Call(TaskFn),
    Iterate(IterateSpec),
}

/// A plain definition of a task, realized into a [`Task`] or, when it carries
/// iteration parameters, an [`IterationTask`].
///
/// # Example
///
/// ```
/// use cooptask::task::{IterateSpec, Iteratee, TaskSpec};
/// use serde_json::json;
///
/// let greet = TaskSpec::call(|inv| json!(format!("hello {}", inv.arguments().len())))
///     .id("greet")
///     .arguments([json!("a"), json!("b")]);
///
/// let double = Iteratee::map(|e| json!(e.value().as_i64().unwrap() * 2));
/// let doubled = TaskSpec::iterate(IterateSpec::new(json!([1, 2, 3]), double).step(2))
///     .id("double");
/// # let _ = (greet, doubled);
/// ```
pub struct TaskSpec {
    id: Option<TaskId>,
    body: Body,
    arguments: Vec<Value>,
    context: Option<Origin>,
    active_only: bool,
    callback: Option<Box<dyn FnOnce(&Value)>>,
}

impl TaskSpec {
    pub fn call(f: impl FnMut(&Invocation<'_>) -> Value + 'static) -> Self {
        Self::with_body(Body::Call(Box::new(f)))
    }

    pub fn iterate(spec: IterateSpec) -> Self {
        Self::with_body(Body::Iterate(spec))
    }

    fn with_body(body: Body) -> Self {
        Self {
            id: None,
            body,
            arguments: Vec::new(),
            context: None,
            active_only: false,
            callback: None,
        }
    }

    /// Caller-supplied id. Generated when unset.
    pub fn id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn arguments(mut self, arguments: impl IntoIterator<Item = Value>) -> Self {
        self.arguments = arguments.into_iter().collect();
        self
    }

    /// Overrides the owner's origin for this task.
    pub fn context(mut self, context: Origin) -> Self {
        self.context = Some(context);
        self
    }

    pub fn active_only(mut self, active_only: bool) -> Self {
        self.active_only = active_only;
        self
    }

    pub fn on_complete(mut self, f: impl FnOnce(&Value) + 'static) -> Self {
        self.callback = Some(Box::new(f));
        self
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        self.id.as_ref()
    }

    pub fn is_iteration(&self) -> bool {
        matches!(self.body, Body::Iterate(_))
    }

    /// Realizes the definition with the crate's default iteration step.
    pub fn build(self) -> Result<Box<dyn Executable>, SchedulerError> {
        self.build_with_step(DEFAULT_STEP)
    }

    pub(crate) fn build_with_step(
        self,
        default_step: NonZeroUsize,
    ) -> Result<Box<dyn Executable>, SchedulerError> {
        let mut header = Header::new(self.id.unwrap_or_else(TaskId::next));
        header.active_only = self.active_only;
        header.context = self.context;
        header.callback = self.callback;

        match self.body {
            Body::Call(f) => Ok(Box::new(Task::new(header, f, self.arguments))),
            Body::Iterate(spec) => Ok(Box::new(IterationTask::try_new(
                header,
                spec,
                default_step,
            )?)),
        }
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("iteration", &self.is_iteration())
            .field("arguments", &self.arguments)
            .field("active_only", &self.active_only)
            .finish_non_exhaustive()
    }
}

/// What [`Owner::add`](crate::owner::Owner::add) accepts: either a definition
/// or an already built task.
#[derive(Debug)]
pub enum NewTask {
    Spec(TaskSpec),
    Ready(Box<dyn Executable>),
}

impl NewTask {
    pub(crate) fn realize(
        self,
        default_step: NonZeroUsize,
    ) -> Result<Box<dyn Executable>, SchedulerError> {
        match self {
            NewTask::Spec(spec) => spec.build_with_step(default_step),
            NewTask::Ready(task) => Ok(task),
        }
    }
}

impl From<TaskSpec> for NewTask {
    fn from(spec: TaskSpec) -> Self {
        NewTask::Spec(spec)
    }
}

impl From<Box<dyn Executable>> for NewTask {
    fn from(task: Box<dyn Executable>) -> Self {
        NewTask::Ready(task)
    }
}

impl From<Task> for NewTask {
    fn from(task: Task) -> Self {
        NewTask::Ready(Box::new(task))
    }
}

impl From<IterationTask> for NewTask {
    fn from(task: IterationTask) -> Self {
        NewTask::Ready(Box::new(task))
    }
}
