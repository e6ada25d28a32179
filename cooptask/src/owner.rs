//! A named bucket of tasks sharing a default execution context.
//!
//! Every task id of an owner lives in exactly one of three places:
//!
//! 1. pending: `tasks` + `task_order`, the authoritative FIFO order
//! 2. live: at most one task, selected by [`Owner::get_next`] or
//!    [`Owner::set_next`] and executing (or suspended mid-iteration)
//! 3. completed: append-only record of finished tasks
//!
//! While the scheduler runs the live task's body it temporarily takes the task
//! out of the live slot; `live_task` keeps its id so completion is still
//! authorized.
use crate::error::SchedulerError;
use crate::task::{Executable, NewTask, Origin, OwnerId, TaskId, TaskState};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;

#[derive(Debug)]
pub struct Owner {
    id: OwnerId,

    /// Diagnostic only, not unique.
    name: String,

    /// Default execution context of the owner's tasks.
    origin: Origin,

    tasks: HashMap<TaskId, Box<dyn Executable>>,

    task_order: VecDeque<TaskId>,

    live_task: Option<TaskId>,

    /// Empty while the scheduler is executing the live task.
    live: Option<Box<dyn Executable>>,

    // Never pruned, grows with the owner's total task volume.
    completed_tasks: HashMap<TaskId, Box<dyn Executable>>,

    default_step: NonZeroUsize,
}

impl Owner {
    pub(crate) fn new(
        name: impl Into<String>,
        origin: Origin,
        default_step: NonZeroUsize,
    ) -> Self {
        Self {
            id: OwnerId::next(),
            name: name.into(),
            origin,
            tasks: HashMap::new(),
            task_order: VecDeque::new(),
            live_task: None,
            live: None,
            completed_tasks: HashMap::new(),
            default_step,
        }
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Appends a task to the back of the FIFO order. Definitions carrying
    /// iteration parameters become an `IterationTask`.
    pub fn add(&mut self, task: impl Into<NewTask>) -> Result<TaskId, SchedulerError> {
        let task = task.into().realize(self.default_step)?;
        let id = task.id().clone();

        if self.contains(&id) {
            return Err(SchedulerError::DuplicateTask {
                owner: self.id,
                task: id,
            });
        }

        self.task_order.push_back(id.clone());
        self.tasks.insert(id.clone(), task);

        Ok(id)
    }

    /// Looks a task up in the pending, live and completed sets.
    pub fn get(&self, id: &TaskId) -> Option<&dyn Executable> {
        if let Some(task) = self.tasks.get(id) {
            return Some(task.as_ref());
        }

        if self.live_task.as_ref() == Some(id)
            && let Some(task) = self.live.as_ref()
        {
            return Some(task.as_ref());
        }

        self.completed_tasks.get(id).map(|task| task.as_ref())
    }

    fn get_mut(&mut self, id: &TaskId) -> Option<&mut Box<dyn Executable>> {
        if self.live_task.as_ref() == Some(id) && self.live.is_some() {
            return self.live.as_mut();
        }

        self.tasks
            .get_mut(id)
            .or_else(|| self.completed_tasks.get_mut(id))
    }

    fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
            || self.live_task.as_ref() == Some(id)
            || self.completed_tasks.contains_key(id)
    }

    /// Promotes a pending task to live, jumping the FIFO order.
    pub fn set_next(&mut self, id: &TaskId) -> Result<(), SchedulerError> {
        let Some(task) = self.tasks.get(id) else {
            return Err(self.not_pending(id));
        };

        if task.state() != TaskState::Pending {
            return Err(SchedulerError::TaskNotPending {
                task: id.clone(),
                state: task.state(),
            });
        }

        if let Some(live) = self.live_task.as_ref() {
            return Err(SchedulerError::InvariantViolation(format!(
                "owner {} already has live task {live} while promoting {id}",
                self.id
            )));
        }

        let task = self.remove_pending(id).ok_or_else(|| self.not_pending(id))?;
        self.install_live(task);
        Ok(())
    }

    /// Pulls the next task to run and makes it live.
    ///
    /// The active owner hands out strictly in FIFO order. An inactive owner
    /// skips (and leaves in place) `active_only` tasks. Paused tasks are always
    /// skipped.
    ///
    /// An id in the FIFO order without a matching task is an internal
    /// inconsistency: the stray id is dropped and reported as
    /// [`SchedulerError::InvariantViolation`].
    pub fn get_next(&mut self, owner_is_active: bool) -> Result<Option<TaskId>, SchedulerError> {
        if self.live_task.is_some() {
            return Ok(None);
        }

        let mut selected = None;
        let mut stray = None;

        for (idx, id) in self.task_order.iter().enumerate() {
            match self.tasks.get(id) {
                None => {
                    stray = Some(idx);
                    break;
                }
                Some(task) if task.state() == TaskState::Paused => continue,
                Some(task) if owner_is_active || !task.is_active_only() => {
                    selected = Some(idx);
                    break;
                }
                Some(_) => {}
            }
        }

        if let Some(stray) = stray.and_then(|idx| self.task_order.remove(idx)) {
            return Err(SchedulerError::InvariantViolation(format!(
                "task {stray} is in the order of owner {} but not in its task set",
                self.id
            )));
        }

        let Some(id) = selected.and_then(|idx| self.task_order.remove(idx)) else {
            return Ok(None);
        };

        match self.tasks.remove(&id) {
            Some(task) => {
                self.install_live(task);
                Ok(Some(id))
            }
            None => Err(SchedulerError::InvariantViolation(format!(
                "task {id} vanished from owner {}",
                self.id
            ))),
        }
    }

    fn install_live(&mut self, task: Box<dyn Executable>) {
        self.live_task = Some(task.id().clone());
        self.live = Some(task);
    }

    pub fn live_task(&self) -> Option<&TaskId> {
        self.live_task.as_ref()
    }

    /// Hands the live task to the scheduler for execution. Its id stays
    /// recorded as live.
    pub(crate) fn take_live(&mut self, id: &TaskId) -> Option<Box<dyn Executable>> {
        if self.live_task.as_ref() == Some(id) {
            self.live.take()
        } else {
            None
        }
    }

    /// Returns a suspended task to the live slot. Hands the task back if it is
    /// no longer the recorded live task (e.g. it was cancelled meanwhile).
    pub(crate) fn restore_live(
        &mut self,
        task: Box<dyn Executable>,
    ) -> Result<(), Box<dyn Executable>> {
        if self.live_task.as_ref() == Some(task.id()) && self.live.is_none() {
            self.live = Some(task);
            Ok(())
        } else {
            Err(task)
        }
    }

    /// Forgets the live task without recording it, e.g. after its body panicked.
    pub(crate) fn abandon_live(&mut self, id: &TaskId) {
        if self.live_task.as_ref() == Some(id) {
            self.live_task = None;
            self.live = None;
        }
    }

    /// Puts a live task back at the head of the pending order, keeping
    /// whatever progress it made.
    pub(crate) fn requeue_front(&mut self, task: Box<dyn Executable>) {
        let id = task.id().clone();

        if self.live_task.as_ref() == Some(&id) {
            self.live_task = None;
            self.live = None;
        }

        self.task_order.push_front(id.clone());
        self.tasks.insert(id, task);
    }

    /// Removes a pending task so it can run outside of the live-task path.
    pub(crate) fn take_pending(&mut self, id: &TaskId) -> Option<Box<dyn Executable>> {
        self.remove_pending(id)
    }

    fn remove_pending(&mut self, id: &TaskId) -> Option<Box<dyn Executable>> {
        let task = self.tasks.remove(id)?;
        self.task_order.retain(|queued| queued != id);
        Some(task)
    }

    /// Records a finished task.
    ///
    /// Accepted when `bypass` is set (the task ran outside of the live-task
    /// path) or when it is the live task. Any other notification was not
    /// authorized by this owner and is ignored: returns false.
    pub fn completed(&mut self, task: Box<dyn Executable>, bypass: bool) -> bool {
        let id = task.id().clone();

        if bypass {
            self.remove_pending(&id);
        } else if self.live_task.as_ref() == Some(&id) {
            self.live_task = None;
            self.live = None;
        } else {
            tracing::debug!(owner = %self.name, task = %id, "ignoring unauthorized completion");
            return false;
        }

        self.completed_tasks.insert(id, task);
        true
    }

    pub fn pause(&mut self, id: &TaskId) -> Option<bool> {
        self.get_mut(id).map(|task| task.pause())
    }

    pub fn unpause(&mut self, id: &TaskId) -> Option<bool> {
        self.get_mut(id).map(|task| task.unpause())
    }

    /// Destroys a pending or live task and forgets it. Returns `None` if the
    /// task is unknown, completed, or its body is executing right now.
    pub fn cancel(&mut self, id: &TaskId) -> Option<TaskState> {
        let mut task = match self.remove_pending(id) {
            Some(task) => task,
            None => {
                let task = self.take_live(id)?;
                self.live_task = None;
                task
            }
        };

        task.destroy();
        Some(task.state())
    }

    pub fn has_pending(&self) -> bool {
        !self.task_order.is_empty()
    }

    pub fn pending_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.task_order.iter()
    }

    pub fn num_pending(&self) -> usize {
        self.task_order.len()
    }

    pub fn num_completed(&self) -> usize {
        self.completed_tasks.len()
    }

    /// Cascades `destroy` to the live task and every pending task, then
    /// releases all collections.
    pub fn destroy(&mut self) {
        if let Some(live) = self.live.as_mut() {
            live.destroy();
        }

        for task in self.tasks.values_mut() {
            task.destroy();
        }

        self.live = None;
        self.live_task = None;
        self.tasks = HashMap::new();
        self.task_order = VecDeque::new();
        self.completed_tasks = HashMap::new();
    }

    fn not_pending(&self, id: &TaskId) -> SchedulerError {
        match self.get(id) {
            Some(task) => SchedulerError::TaskNotPending {
                task: id.clone(),
                state: task.state(),
            },
            None => SchedulerError::UnknownTask {
                owner: self.id,
                task: id.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ExecMode, IterateSpec, Iteratee, Step, TaskCallback, TaskSpec};
    use crate::test_utils::*;
    use anyhow::Result;
    use serde_json::{Value, json};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Task whose state stays observable after the owner dropped it.
    #[derive(Debug)]
    struct Spy {
        id: TaskId,
        state: Rc<Cell<TaskState>>,
    }

    impl Spy {
        fn new(id: &str) -> (NewTask, Rc<Cell<TaskState>>) {
            let state = Rc::new(Cell::new(TaskState::Pending));
            let spy = Spy {
                id: id.into(),
                state: state.clone(),
            };
            (NewTask::Ready(Box::new(spy)), state)
        }

        fn transition(&self, f: impl FnOnce(&mut TaskState) -> bool) -> bool {
            let mut state = self.state.get();
            let changed = f(&mut state);
            self.state.set(state);
            changed
        }
    }

    impl Executable for Spy {
        fn id(&self) -> &TaskId {
            &self.id
        }

        fn state(&self) -> TaskState {
            self.state.get()
        }

        fn is_active_only(&self) -> bool {
            false
        }

        fn result(&self) -> Option<&Value> {
            None
        }

        fn execute(&mut self, _origin: &Origin, _mode: ExecMode) -> Step {
            if !self.transition(TaskState::transition_to_active) {
                return Step::Cached(None);
            }

            self.transition(|state| {
                state.transition_to_complete();
                true
            });
            Step::Complete(Value::Null)
        }

        fn take_callback(&mut self) -> Option<TaskCallback> {
            None
        }

        fn pause(&mut self) -> bool {
            self.transition(TaskState::transition_to_paused)
        }

        fn unpause(&mut self) -> bool {
            self.transition(TaskState::transition_to_pending)
        }

        fn destroy(&mut self) {
            self.transition(|state| {
                state.transition_to_cancelled();
                true
            });
        }

        fn kind(&self) -> &'static str {
            "spy"
        }
    }

    fn owner() -> Owner {
        Owner::new("test", origin("origin"), NonZeroUsize::MIN)
    }

    fn noop(id: &str) -> TaskSpec {
        TaskSpec::call(|_| Value::Null).id(id)
    }

    fn ids(owner: &Owner) -> Vec<&str> {
        owner.pending_ids().map(TaskId::as_str).collect()
    }

    /// Pulls the next task, runs it and reports completion like the scheduler.
    fn run_next(owner: &mut Owner, active: bool) -> Result<Option<TaskId>> {
        let Some(id) = owner.get_next(active)? else {
            return Ok(None);
        };

        let mut task = owner.take_live(&id).expect("live task present");
        let origin = owner.origin().clone();
        assert!(matches!(task.execute(&origin, ExecMode::Inline), Step::Complete(_)));
        assert!(owner.completed(task, false));

        Ok(Some(id))
    }

    #[test]
    fn test_fifo_order() -> Result<()> {
        let mut owner = owner();
        for id in ["a", "b", "c"] {
            owner.add(noop(id))?;
        }

        assert_eq!(ids(&owner), ["a", "b", "c"]);

        let mut ran = Vec::new();
        while let Some(id) = run_next(&mut owner, true)? {
            ran.push(id);
        }

        assert_eq!(ran, [TaskId::from("a"), "b".into(), "c".into()]);
        assert!(!owner.has_pending());
        assert_eq!(owner.num_completed(), 3);
        Ok(())
    }

    #[test]
    fn test_duplicate_id_rejected() -> Result<()> {
        let mut owner = owner();
        owner.add(noop("a"))?;

        let err = owner.add(noop("a")).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTask { .. }));

        // Also rejected once the first one completed.
        run_next(&mut owner, true)?;
        assert!(owner.add(noop("a")).is_err());
        Ok(())
    }

    #[test]
    fn test_inactive_owner_skips_active_only() -> Result<()> {
        let mut owner = owner();
        owner.add(noop("a").active_only(true))?;
        owner.add(noop("b"))?;
        owner.add(noop("c").active_only(true))?;

        assert_eq!(owner.get_next(false)?, Some("b".into()));
        assert_eq!(owner.live_task(), Some(&"b".into()));
        assert_eq!(ids(&owner), ["a", "c"]);

        let task = owner.take_live(&"b".into()).expect("live");
        assert!(owner.completed(task, false));

        // Only active_only tasks left.
        assert_eq!(owner.get_next(false)?, None);
        assert_eq!(ids(&owner), ["a", "c"]);

        // The active owner ignores active_only.
        assert_eq!(owner.get_next(true)?, Some("a".into()));
        Ok(())
    }

    #[test]
    fn test_get_next_skips_paused() -> Result<()> {
        let mut owner = owner();
        owner.add(noop("a"))?;
        owner.add(noop("b"))?;

        assert_eq!(owner.pause(&"a".into()), Some(true));
        assert_eq!(owner.get_next(true)?, Some("b".into()));
        assert_eq!(ids(&owner), ["a"]);
        Ok(())
    }

    #[test]
    fn test_set_next_jumps_the_queue() -> Result<()> {
        let mut owner = owner();
        for id in ["a", "b", "c"] {
            owner.add(noop(id))?;
        }

        owner.set_next(&"c".into())?;
        assert_eq!(owner.live_task(), Some(&"c".into()));
        assert_eq!(ids(&owner), ["a", "b"]);
        Ok(())
    }

    #[test]
    fn test_set_next_fails_without_state_change() -> Result<()> {
        let mut owner = owner();
        owner.add(noop("a"))?;
        owner.add(noop("b"))?;

        let err = owner.set_next(&"zzz".into()).unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownTask { .. }));

        owner.pause(&"b".into());
        let err = owner.set_next(&"b".into()).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::TaskNotPending {
                state: TaskState::Paused,
                ..
            }
        ));

        run_next(&mut owner, true)?;
        let err = owner.set_next(&"a".into()).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::TaskNotPending {
                state: TaskState::Complete,
                ..
            }
        ));

        assert_eq!(ids(&owner), ["b"]);
        assert_eq!(owner.live_task(), None);
        Ok(())
    }

    #[test]
    fn test_get_finds_every_set() -> Result<()> {
        let mut owner = owner();
        for id in ["done", "live", "pending"] {
            owner.add(noop(id))?;
        }
        run_next(&mut owner, true)?;
        owner.get_next(true)?;

        assert_eq!(owner.get(&"done".into()).map(|t| t.state()), Some(TaskState::Complete));
        assert_eq!(owner.get(&"live".into()).map(|t| t.state()), Some(TaskState::Pending));
        assert_eq!(owner.get(&"pending".into()).map(|t| t.state()), Some(TaskState::Pending));
        assert!(owner.get(&"missing".into()).is_none());
        Ok(())
    }

    #[test]
    fn test_completed_requires_authorization() -> Result<()> {
        let mut owner = owner();
        owner.add(noop("a"))?;
        owner.add(noop("b"))?;

        // Not live, not bypassed: ignored.
        let stray = TaskSpec::call(|_| Value::Null).id("stray").build()?;
        assert!(!owner.completed(stray, false));
        assert_eq!(owner.num_completed(), 0);

        // Bypass: removed from the pending set and recorded.
        let mut b = owner.take_pending(&"b".into()).expect("pending");
        b.execute(&origin("o"), ExecMode::Inline);
        assert!(owner.completed(b, true));
        assert_eq!(ids(&owner), ["a"]);
        assert_eq!(owner.get(&"b".into()).map(|t| t.state()), Some(TaskState::Complete));
        Ok(())
    }

    #[test]
    fn test_requeue_front_keeps_progress() -> Result<()> {
        let mut owner = owner();
        let spec = IterateSpec::new(json!([1, 2, 3]), Iteratee::each(|_| {})).step(1);
        owner.add(TaskSpec::iterate(spec).id("it"))?;
        owner.add(noop("after"))?;

        let id = owner.get_next(true)?.expect("next");
        let mut task = owner.take_live(&id).expect("live");
        assert_eq!(task.execute(&origin("o"), ExecMode::Turn), Step::Yield);
        assert!(task.pause());

        owner.requeue_front(task);
        assert_eq!(owner.live_task(), None);
        assert_eq!(ids(&owner), ["it", "after"]);

        // Paused, so the next pick is the other task.
        assert_eq!(owner.get_next(true)?, Some("after".into()));
        Ok(())
    }

    #[test]
    fn test_cancel_pending_and_live() -> Result<()> {
        let mut owner = owner();
        owner.add(noop("a"))?;
        owner.add(noop("b"))?;

        assert_eq!(owner.cancel(&"b".into()), Some(TaskState::Cancelled));
        assert_eq!(ids(&owner), ["a"]);

        owner.get_next(true)?;
        assert_eq!(owner.cancel(&"a".into()), Some(TaskState::Cancelled));
        assert_eq!(owner.live_task(), None);

        assert_eq!(owner.cancel(&"a".into()), None);
        Ok(())
    }

    #[test]
    fn test_stray_order_entry_is_invariant_violation() -> Result<()> {
        let mut owner = owner();
        owner.add(noop("a"))?;
        owner.task_order.push_front("ghost".into());

        let err = owner.get_next(true).unwrap_err();
        assert!(err.is_fatal());

        // The stray id was dropped, the real task is still reachable.
        assert_eq!(owner.get_next(true)?, Some("a".into()));
        Ok(())
    }

    #[test]
    fn test_destroy_cascades() -> Result<()> {
        let mut owner = owner();
        let captured = std::rc::Rc::new(());

        for id in ["live", "p1", "p2", "p3"] {
            let captured = captured.clone();
            owner.add(TaskSpec::call(move |_| json!(*captured)).id(id))?;
        }
        owner.get_next(true)?;
        assert_eq!(std::rc::Rc::strong_count(&captured), 5);

        owner.destroy();

        // Every body released.
        assert_eq!(std::rc::Rc::strong_count(&captured), 1);
        assert!(!owner.has_pending());
        assert!(owner.live_task().is_none());
        assert!(owner.get(&"p1".into()).is_none());
        Ok(())
    }

    #[test]
    fn test_destroy_cancels_live_and_pending_tasks() -> Result<()> {
        let mut owner = owner();
        let mut states = Vec::new();

        for id in ["done", "live", "p1", "p2", "p3"] {
            let (task, state) = Spy::new(id);
            owner.add(task)?;
            states.push((id, state));
        }

        run_next(&mut owner, true)?;
        assert_eq!(owner.get_next(true)?, Some("live".into()));
        assert_eq!(ids(&owner), ["p1", "p2", "p3"]);

        owner.destroy();

        // All pending tasks plus the live one are cancelled, completed work stays complete.
        for (id, state) in &states {
            let expected = match *id {
                "done" => TaskState::Complete,
                _ => TaskState::Cancelled,
            };
            assert_eq!(state.get(), expected, "task {id}");
        }
        Ok(())
    }
}
