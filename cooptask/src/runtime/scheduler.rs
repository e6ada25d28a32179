use crate::context;
use crate::error::SchedulerError;
use crate::owner::Owner;
use crate::runtime::builder::{InvariantPolicy, SchedulerConfig};
use crate::runtime::request::{PriorityRequest, RequireOptions};
use crate::task::{ExecMode, NewTask, Origin, OwnerId, Step, TaskId, TaskState};
#[allow(unused)]
use crate::utils::scheduler::{Call, Method};
#[cfg(test)]
use crate::utils::scheduler::Tracker;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::rc::Rc;
use std::time::Instant;

/// A unit of deferred work. The host runs one per [`Handle::run_turn`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Turn {
    /// One dispatch pass: run at most one task, or go idle.
    Dispatch,

    /// Continue an iteration task that yielded mid-flight.
    Resume {
        owner: OwnerId,
        task: TaskId,
        started: Instant,
    },
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) owners: HashMap<OwnerId, Owner>,

    /// Back is the top of the stack, i.e. the active owner.
    pub(crate) owner_stack: VecDeque<OwnerId>,

    pub(crate) priority: VecDeque<PriorityRequest>,

    pub(crate) turns: VecDeque<Turn>,

    /// A dispatch turn is queued or a task is in flight.
    pub(crate) running: bool,

    pub(crate) shut_down: bool,
}

impl State {
    fn owner(&self, id: OwnerId) -> Result<&Owner, SchedulerError> {
        self.owners.get(&id).ok_or(SchedulerError::UnknownOwner(id))
    }

    fn owner_mut(&mut self, id: OwnerId) -> Result<&mut Owner, SchedulerError> {
        self.owners
            .get_mut(&id)
            .ok_or(SchedulerError::UnknownOwner(id))
    }

    pub(crate) fn active_owner(&self) -> Option<OwnerId> {
        self.owner_stack.back().copied()
    }

    /// Moves an owner to the top of the stack.
    fn promote(&mut self, id: OwnerId) -> Result<(), SchedulerError> {
        self.owner(id)?;

        if self.active_owner() != Some(id) {
            self.owner_stack.retain(|owner| *owner != id);
            self.owner_stack.push_back(id);
        }

        Ok(())
    }

    /// Moves the top owner to the bottom of the stack.
    pub(crate) fn rotate(&mut self) {
        if let Some(top) = self.owner_stack.pop_back() {
            self.owner_stack.push_front(top);
        }
    }

    /// Queues a dispatch pass unless the dispatcher is already running.
    fn kick(&mut self) -> bool {
        if self.running || self.shut_down {
            return false;
        }

        self.running = true;
        self.turns.push_back(Turn::Dispatch);
        true
    }
}

#[derive(Debug)]
pub struct Scheduler {
    pub(crate) cfg: SchedulerConfig,

    pub(crate) state: RefCell<State>,

    /// Set while a turn is being run, rejects nested `run_turn` calls.
    pub(crate) in_turn: Cell<bool>,

    #[cfg(test)]
    pub(crate) tracker: Tracker,
}

impl Scheduler {
    pub(crate) fn new(cfg: SchedulerConfig) -> Self {
        Self {
            cfg,
            state: RefCell::new(State::default()),
            in_turn: Cell::new(false),

            #[cfg(test)]
            tracker: Tracker::new(),
        }
    }

    // Introspection on every dispatcher decision in tests, no-op otherwise.
    #[allow(unused)]
    #[inline(always)]
    pub(crate) fn track(&self, method: Method, call: Call) {
        #[cfg(test)]
        self.tracker.record(method, call);
    }

    /// Applies the configured [`InvariantPolicy`].
    #[track_caller]
    pub(crate) fn invariant_violation(&self, err: SchedulerError) {
        match self.cfg.invariant_policy {
            InvariantPolicy::Panic => panic!("{err}"),
            InvariantPolicy::LogAndSkip => {
                tracing::error!(scheduler = %self.cfg.name, error = %err, "skipping inconsistent entry");
            }
        }
    }
}

/// Cheap, cloneable reference to a scheduler. Confined to the thread that
/// built it.
#[derive(Debug, Clone)]
pub struct Handle(Rc<Scheduler>);

impl Deref for Handle {
    type Target = Rc<Scheduler>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Handle {
    pub(crate) fn new(cfg: SchedulerConfig) -> Self {
        Handle(Rc::new(Scheduler::new(cfg)))
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// Creates an owner and makes it the active one.
    pub fn register(
        &self,
        name: impl Into<String>,
        origin: Origin,
    ) -> Result<OwnerId, SchedulerError> {
        let mut state = self.state.borrow_mut();
        if state.shut_down {
            return Err(SchedulerError::ShutDown);
        }

        let owner = Owner::new(name, origin, self.cfg.default_step);
        let id = owner.id();

        tracing::debug!(scheduler = %self.cfg.name, owner = %owner.name(), id = %id, "registered owner");

        state.owners.insert(id, owner);
        state.owner_stack.push_back(id);

        Ok(id)
    }

    /// Destroys an owner and every task it still holds. If it was the active
    /// owner, the next one down the stack takes over.
    ///
    /// Queued priority requests that reference the owner stay queued and
    /// resolve its tasks as missing.
    pub fn unregister(&self, id: OwnerId) -> Result<(), SchedulerError> {
        let removed = {
            let mut state = self.state.borrow_mut();
            let owner = state.owners.remove(&id);
            state.owner_stack.retain(|owner| *owner != id);
            owner
        };

        let Some(mut owner) = removed else {
            tracing::warn!(scheduler = %self.cfg.name, owner = %id, "unregister: unknown owner");
            return Err(SchedulerError::UnknownOwner(id));
        };

        tracing::debug!(scheduler = %self.cfg.name, owner = %owner.name(), "unregistering owner");

        // Task bodies are dropped here, outside of any borrow.
        owner.destroy();
        Ok(())
    }

    /// Moves an owner to the top of the stack and triggers a check.
    pub fn activate(&self, id: OwnerId) -> Result<(), SchedulerError> {
        self.check(Some(id))
    }

    /// Adds one task, makes its owner active and triggers a check.
    pub fn add_task(
        &self,
        owner: OwnerId,
        task: impl Into<NewTask>,
    ) -> Result<TaskId, SchedulerError> {
        let id = self.with_owner_for_add(owner, |target| target.add(task))?;
        self.check(Some(owner))?;
        Ok(id)
    }

    /// Adds tasks in order, makes their owner active and triggers a check.
    ///
    /// Stops at the first rejected task; the ones before it stay queued.
    pub fn add_tasks<T>(
        &self,
        owner: OwnerId,
        tasks: impl IntoIterator<Item = T>,
    ) -> Result<Vec<TaskId>, SchedulerError>
    where
        T: Into<NewTask>,
    {
        let added = self.with_owner_for_add(owner, |target| {
            tasks.into_iter().map(|task| target.add(task)).collect()
        });

        match added {
            Err(err @ (SchedulerError::UnknownOwner(_) | SchedulerError::ShutDown)) => Err(err),
            added => {
                self.check(Some(owner))?;
                added
            }
        }
    }

    fn with_owner_for_add<R>(
        &self,
        owner: OwnerId,
        f: impl FnOnce(&mut Owner) -> Result<R, SchedulerError>,
    ) -> Result<R, SchedulerError> {
        let mut state = self.state.borrow_mut();
        if state.shut_down {
            return Err(SchedulerError::ShutDown);
        }

        let target = state.owner_mut(owner).inspect_err(|err| {
            tracing::warn!(scheduler = %self.cfg.name, error = %err, "add_task");
        })?;

        tracing::debug!(scheduler = %self.cfg.name, owner = %target.name(), "adding tasks");
        f(target)
    }

    /// Demands that specific tasks run next.
    ///
    /// Every id must exist on the owner, otherwise nothing happens and the
    /// missing reference is returned as an error.
    ///
    /// - immediate: runs the pending ones inline, back-to-back, and returns
    ///   all results (completed tasks contribute their cached result).
    /// - otherwise: queues a priority request serviced ahead of every owner
    ///   task and returns `None`. Results reach the callback.
    pub fn require_task<I>(
        &self,
        owner: OwnerId,
        task_ids: I,
        opts: RequireOptions,
    ) -> Result<Option<Vec<Value>>, SchedulerError>
    where
        I: IntoIterator,
        I::Item: Into<TaskId>,
    {
        let task_ids: Vec<TaskId> = task_ids.into_iter().map(Into::into).collect();

        {
            let state = self.state.borrow();
            if state.shut_down {
                return Err(SchedulerError::ShutDown);
            }

            let found = state.owner(owner).and_then(|o| {
                let missing = task_ids
                    .iter()
                    .find(|id| o.get(id).is_none() && o.live_task() != Some(*id));

                match missing {
                    Some(missing) => Err(SchedulerError::UnknownTask {
                        owner,
                        task: missing.clone(),
                    }),
                    None => Ok(()),
                }
            });

            if let Err(err) = found {
                tracing::warn!(scheduler = %self.cfg.name, error = %err, "require_task");
                return Err(err);
            }
        }

        if opts.immediate {
            return self.require_immediate(owner, &task_ids, opts).map(Some);
        }

        tracing::debug!(scheduler = %self.cfg.name, owner = %owner, tasks = ?task_ids, "queued priority request");

        let mut state = self.state.borrow_mut();
        state.priority.push_back(PriorityRequest::new(owner, task_ids, opts));
        state.kick();

        Ok(None)
    }

    fn require_immediate(
        &self,
        owner_id: OwnerId,
        task_ids: &[TaskId],
        opts: RequireOptions,
    ) -> Result<Vec<Value>, SchedulerError> {
        let mut results = Vec::with_capacity(task_ids.len());

        for id in task_ids {
            let taken = {
                let mut state = self.state.borrow_mut();
                let owner = state.owner_mut(owner_id)?;

                match owner.get(id).map(|task| (task.state(), task.result().cloned())) {
                    Some((TaskState::Pending, _)) => owner
                        .take_pending(id)
                        .map(|task| (task, owner.origin().clone())),
                    // Suspended mid-iteration, contributes what it computed so far.
                    Some((TaskState::Complete | TaskState::Active, result)) => {
                        results.push(result.unwrap_or_default());
                        continue;
                    }
                    other => {
                        // A body requiring its own task, or a paused/cancelled one.
                        let task_state = other.map_or(TaskState::Active, |(s, _)| s);
                        tracing::warn!(
                            scheduler = %self.cfg.name,
                            task = %id,
                            state = %task_state,
                            "require_task: task cannot run now"
                        );
                        results.push(Value::Null);
                        continue;
                    }
                }
            };

            let Some((mut task, origin)) = taken else {
                results.push(Value::Null);
                continue;
            };

            tracing::debug!(scheduler = %self.cfg.name, owner = %owner_id, task = %id, "executing task inline");

            let step = {
                let _ctx = context::enter(self, id);
                task.execute(&origin, ExecMode::Inline)
            };

            let result = match step {
                Step::Complete(result) => result,
                Step::Cached(result) => result.unwrap_or_default(),
                Step::Yield | Step::Halted => Value::Null,
            };

            let callback = task.take_callback();
            if let Ok(owner) = self.state.borrow_mut().owner_mut(owner_id) {
                owner.completed(task, true);
            }

            if let Some(callback) = callback {
                callback(&result);
            }

            results.push(result);
        }

        if let Some((callback, passed)) = opts.into_callback(&results) {
            callback(passed);
        }

        Ok(results)
    }

    /// Optionally activates `owner`, then queues a dispatch pass unless the
    /// dispatcher is already running. Never executes work synchronously.
    pub fn check(&self, owner: Option<OwnerId>) -> Result<(), SchedulerError> {
        let mut state = self.state.borrow_mut();

        if let Some(owner) = owner {
            state.promote(owner).inspect_err(|err| {
                tracing::warn!(scheduler = %self.cfg.name, error = %err, "check");
            })?;
        }

        if state.kick() {
            tracing::trace!(scheduler = %self.cfg.name, "dispatch scheduled");
        }

        Ok(())
    }

    /// PENDING -> PAUSED. Paused tasks are skipped by selection; an iteration
    /// task paused mid-flight stops at its next chunk boundary.
    ///
    /// A task whose body is executing right now cannot be paused and is
    /// reported as [`TaskState::Active`].
    pub fn pause_task(&self, owner: OwnerId, task: &TaskId) -> Result<bool, SchedulerError> {
        let mut state = self.state.borrow_mut();
        let owner_ref = state.owner_mut(owner)?;

        match owner_ref.pause(task) {
            Some(paused) => Ok(paused),
            None => Err(unreachable_task(owner_ref, task)),
        }
    }

    /// PAUSED -> PENDING, then triggers a check.
    pub fn resume_task(&self, owner: OwnerId, task: &TaskId) -> Result<bool, SchedulerError> {
        let mut state = self.state.borrow_mut();
        let owner_ref = state.owner_mut(owner)?;

        let resumed = match owner_ref.unpause(task) {
            Some(resumed) => resumed,
            None => return Err(unreachable_task(owner_ref, task)),
        };

        if resumed {
            state.kick();
        }

        Ok(resumed)
    }

    /// Destroys a pending or live task.
    pub fn cancel_task(&self, owner: OwnerId, task: &TaskId) -> Result<(), SchedulerError> {
        let mut state = self.state.borrow_mut();
        let owner_ref = state.owner_mut(owner)?;

        if owner_ref.cancel(task).is_some() {
            tracing::debug!(scheduler = %self.cfg.name, owner = %owner_ref.name(), %task, "cancelled task");
            return Ok(());
        }

        Err(unreachable_task(owner_ref, task))
    }

    pub fn task_state(&self, owner: OwnerId, task: &TaskId) -> Option<TaskState> {
        let state = self.state.borrow();
        let owner = state.owners.get(&owner)?;

        match owner.get(task) {
            Some(task) => Some(task.state()),
            None => (owner.live_task() == Some(task)).then_some(TaskState::Active),
        }
    }

    pub fn task_result(&self, owner: OwnerId, task: &TaskId) -> Option<Value> {
        let state = self.state.borrow();
        state.owners.get(&owner)?.get(task)?.result().cloned()
    }

    pub fn has_pending(&self, owner: OwnerId) -> bool {
        self.state
            .borrow()
            .owners
            .get(&owner)
            .is_some_and(Owner::has_pending)
    }

    /// Registered owners in stack order, active owner last.
    pub fn owner_ids(&self) -> Vec<OwnerId> {
        self.state.borrow().owner_stack.iter().copied().collect()
    }

    pub fn active_owner(&self) -> Option<OwnerId> {
        self.state.borrow().active_owner()
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    pub fn pending_turns(&self) -> usize {
        self.state.borrow().turns.len()
    }

    pub fn priority_requests(&self) -> usize {
        self.state.borrow().priority.len()
    }

    /// Destroys every owner and drops queued work. Callbacks of queued
    /// priority requests are dropped without being called.
    pub fn shutdown(&self) {
        let (owners, requests) = {
            let mut state = self.state.borrow_mut();
            state.shut_down = true;
            state.running = false;
            state.turns.clear();
            state.owner_stack.clear();

            (
                std::mem::take(&mut state.owners),
                std::mem::take(&mut state.priority),
            )
        };

        tracing::debug!(scheduler = %self.cfg.name, owners = owners.len(), requests = requests.len(), "shutting down");

        for (_, mut owner) in owners {
            owner.destroy();
        }
        drop(requests);
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.borrow().shut_down
    }
}

/// Error for a task the owner could not act on: known but in the wrong state,
/// executing right now, or missing.
fn unreachable_task(owner: &Owner, task: &TaskId) -> SchedulerError {
    match owner.get(task).map(|t| t.state()) {
        Some(state) => SchedulerError::TaskNotPending {
            task: task.clone(),
            state,
        },
        // Executing right now.
        None if owner.live_task() == Some(task) => SchedulerError::TaskNotPending {
            task: task.clone(),
            state: TaskState::Active,
        },
        None => SchedulerError::UnknownTask {
            owner: owner.id(),
            task: task.clone(),
        },
    }
}
