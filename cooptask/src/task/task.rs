use crate::task::{
    ExecMode, Executable, Header, Invocation, Origin, Step, TaskCallback, TaskFn, TaskId,
    TaskState,
};
use serde_json::Value;
use std::fmt;

/// Atomic unit of work: one call of its body.
pub struct Task {
    header: Header,

    body: Option<TaskFn>,

    arguments: Vec<Value>,
}

impl Task {
    pub(crate) fn new(header: Header, body: TaskFn, arguments: Vec<Value>) -> Self {
        Self {
            header,
            body: Some(body),
            arguments,
        }
    }
}

impl Executable for Task {
    fn id(&self) -> &TaskId {
        &self.header.id
    }

    fn state(&self) -> TaskState {
        self.header.state
    }

    fn is_active_only(&self) -> bool {
        self.header.active_only
    }

    fn result(&self) -> Option<&Value> {
        self.header.result.as_ref()
    }

    fn execute(&mut self, origin: &Origin, _mode: ExecMode) -> Step {
        if !self.header.state.transition_to_active() {
            return Step::Cached(self.header.result.clone());
        }

        // Only a destroyed task has no body, and destroyed tasks are terminal.
        let Some(body) = self.body.as_mut() else {
            return Step::Cached(None);
        };

        let context = self.header.context.as_ref().unwrap_or(origin);
        let result = body(&Invocation::new(&self.header.id, context, &self.arguments));

        self.header.state.transition_to_complete();
        self.header.result = Some(result.clone());

        Step::Complete(result)
    }

    fn take_callback(&mut self) -> Option<TaskCallback> {
        self.header.callback.take()
    }

    fn pause(&mut self) -> bool {
        self.header.pause()
    }

    fn unpause(&mut self) -> bool {
        self.header.unpause()
    }

    fn destroy(&mut self) {
        self.header.destroy();
        self.body = None;
        self.arguments = Vec::new();
    }

    fn kind(&self) -> &'static str {
        "task"
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("header", &self.header)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskSpec;
    use crate::test_utils::*;
    use anyhow::Result;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_execute_runs_body_with_arguments() -> Result<()> {
        let mut task = TaskSpec::call(|inv| {
            let a = inv.arg(0).and_then(Value::as_i64).unwrap_or_default();
            let b = inv.arg(1).and_then(Value::as_i64).unwrap_or_default();
            json!(a + b)
        })
        .arguments([json!(2), json!(40)])
        .build()?;

        let step = task.execute(&origin("host"), ExecMode::Turn);

        assert_eq!(step, Step::Complete(json!(42)));
        assert!(task.is_complete());
        assert_eq!(task.result(), Some(&json!(42)));
        Ok(())
    }

    #[test]
    fn test_execute_twice_runs_body_once() -> Result<()> {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();

        let mut task = TaskSpec::call(move |_| {
            calls_clone.set(calls_clone.get() + 1);
            json!("done")
        })
        .build()?;

        let origin = origin("host");
        assert_eq!(
            task.execute(&origin, ExecMode::Turn),
            Step::Complete(json!("done"))
        );
        assert_eq!(
            task.execute(&origin, ExecMode::Turn),
            Step::Cached(Some(json!("done")))
        );
        assert_eq!(calls.get(), 1);
        Ok(())
    }

    #[test]
    fn test_context_defaults_to_origin() -> Result<()> {
        let mut task =
            TaskSpec::call(|inv| json!(inv.context_as::<&'static str>().copied())).build()?;
        assert_eq!(
            task.execute(&origin("owner-origin"), ExecMode::Turn),
            Step::Complete(json!("owner-origin"))
        );

        let mut task = TaskSpec::call(|inv| json!(inv.context_as::<&'static str>().copied()))
            .context(origin("override"))
            .build()?;
        assert_eq!(
            task.execute(&origin("owner-origin"), ExecMode::Turn),
            Step::Complete(json!("override"))
        );
        Ok(())
    }

    #[test]
    fn test_paused_task_does_not_execute() -> Result<()> {
        let mut task = TaskSpec::call(|_| json!(1)).build()?;

        assert!(task.pause());
        assert_eq!(task.state(), TaskState::Paused);
        assert_eq!(task.execute(&origin("host"), ExecMode::Turn), Step::Cached(None));

        assert!(task.unpause());
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(
            task.execute(&origin("host"), ExecMode::Turn),
            Step::Complete(json!(1))
        );
        Ok(())
    }

    #[test]
    fn test_destroy_pending_task_cancels() -> Result<()> {
        let mut task = TaskSpec::call(|_| json!(1)).on_complete(|_| {}).build()?;

        task.destroy();
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(task.take_callback().is_none());

        // Idempotent and terminal.
        task.destroy();
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(!task.pause());
        assert_eq!(task.execute(&origin("host"), ExecMode::Turn), Step::Cached(None));
        Ok(())
    }

    #[test]
    fn test_destroy_complete_task_stays_complete() -> Result<()> {
        let mut task = TaskSpec::call(|_| json!(1)).build()?;
        task.execute(&origin("host"), ExecMode::Turn);

        task.destroy();
        assert_eq!(task.state(), TaskState::Complete);
        assert!(!task.pause());
        Ok(())
    }
}
