//! The dispatcher. Every turn runs at most one task body, or one chunk of an
//! iteration task, and then defers to the host by queueing the next turn.
use crate::context;
use crate::error::SchedulerError;
use crate::runtime::Handle;
use crate::runtime::request::PriorityRequest;
use crate::runtime::scheduler::{State, Turn};
use crate::task::{ExecMode, Executable, OwnerId, Step, TaskId, TaskState};
#[allow(unused)]
use crate::utils::scheduler::{Call, Method};
use crate::utils::ScopeGuard;
use serde_json::Value;
use std::time::Instant;

/// Outcome of servicing the head of the priority queue.
enum PriorityStep {
    Empty,

    /// The request was fully resolved and popped.
    Done(PriorityRequest),

    /// The task was promoted to its owner's live task.
    Run { owner: OwnerId, task: TaskId },

    Invariant(SchedulerError),
}

impl State {
    fn poll_priority(&mut self, scheduler: &str) -> PriorityStep {
        let Some(req) = self.priority.front_mut() else {
            return PriorityStep::Empty;
        };

        while let Some(id) = req.next_id().cloned() {
            let Some(owner) = self.owners.get_mut(&req.owner) else {
                tracing::warn!(scheduler, owner = %req.owner, task = %id, "priority request: unknown owner");
                req.accept(Value::Null);
                continue;
            };

            match owner.get(&id).map(|task| (task.state(), task.result().cloned())) {
                Some((TaskState::Complete | TaskState::Active, result)) => {
                    req.accept(result.unwrap_or_default())
                }
                Some((TaskState::Pending, _)) => {
                    return match owner.set_next(&id) {
                        Ok(()) => PriorityStep::Run {
                            owner: req.owner,
                            task: id,
                        },
                        Err(err) => {
                            req.accept(Value::Null);
                            PriorityStep::Invariant(err)
                        }
                    };
                }
                Some((state, _)) => {
                    tracing::warn!(scheduler, owner = %owner.name(), task = %id, %state, "priority request: skipping task");
                    req.accept(Value::Null);
                }
                None => {
                    tracing::warn!(scheduler, owner = %owner.name(), task = %id, "priority request: unknown task");
                    req.accept(Value::Null);
                }
            }
        }

        match self.priority.pop_front() {
            Some(req) => PriorityStep::Done(req),
            None => PriorityStep::Empty,
        }
    }
}

impl Handle {
    /// Runs the next queued turn. Returns false if there was nothing to run or
    /// if called from inside a task body.
    ///
    /// A panicking task body propagates out of this call. The task is dropped
    /// as cancelled and the scheduler stays usable.
    pub fn run_turn(&self) -> bool {
        if self.in_turn.get() {
            tracing::warn!(scheduler = %self.cfg.name, "run_turn called from inside a turn");
            return false;
        }

        let Some(turn) = self.state.borrow_mut().turns.pop_front() else {
            return false;
        };

        self.in_turn.set(true);
        let _reset = ScopeGuard::new(|| self.in_turn.set(false));

        match turn {
            Turn::Dispatch => self.dispatch(),
            Turn::Resume {
                owner,
                task,
                started,
            } => self.resume(owner, task, started),
        }

        true
    }

    /// Runs turns until none is left. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut turns = 0;
        while self.run_turn() {
            turns += 1;
        }
        turns
    }

    fn push_turn(&self, turn: Turn) {
        let mut state = self.state.borrow_mut();
        if !state.shut_down {
            state.turns.push_back(turn);
        }
    }

    fn dispatch(&self) {
        self.track(Method::Dispatch, Call::Dispatch);

        loop {
            let step = self.state.borrow_mut().poll_priority(&self.cfg.name);

            match step {
                PriorityStep::Empty => break,
                PriorityStep::Done(req) => {
                    self.track(
                        Method::RequestDone,
                        Call::RequestDone {
                            owner: req.owner,
                            num_tasks: req.len(),
                        },
                    );
                    req.fire();
                }
                PriorityStep::Run { owner, task } => return self.execute(owner, task, true),
                PriorityStep::Invariant(err) => self.invariant_violation(err),
            }
        }

        let mut rotations = 0;

        loop {
            let mut state = self.state.borrow_mut();

            if rotations >= state.owner_stack.len() {
                break;
            }

            let Some(top) = state.active_owner() else {
                break;
            };

            let Some(owner) = state.owners.get_mut(&top) else {
                state.owner_stack.retain(|owner| *owner != top);
                drop(state);
                self.invariant_violation(SchedulerError::InvariantViolation(format!(
                    "owner {top} is on the stack but not registered"
                )));
                continue;
            };

            match owner.get_next(true) {
                Ok(Some(task)) => {
                    drop(state);
                    return self.execute(top, task, false);
                }
                Ok(None) => {
                    state.rotate();
                    rotations += 1;
                    drop(state);
                    self.track(Method::Rotate, Call::Rotate { owner: top });
                }
                Err(err) => {
                    drop(state);
                    self.invariant_violation(err);
                }
            }
        }

        self.state.borrow_mut().running = false;
        self.track(Method::Idle, Call::Idle);
        tracing::trace!(scheduler = %self.cfg.name, "idle");
    }

    /// Runs the first turn of `task`, which must be its owner's live task.
    fn execute(&self, owner_id: OwnerId, task_id: TaskId, priority: bool) {
        let started = Instant::now();

        let taken = {
            let mut state = self.state.borrow_mut();
            state.owners.get_mut(&owner_id).and_then(|owner| {
                let origin = owner.origin().clone();
                let name = owner.name().to_string();
                owner.take_live(&task_id).map(|task| (task, origin, name))
            })
        };

        let Some((mut task, origin, owner_name)) = taken else {
            self.invariant_violation(SchedulerError::InvariantViolation(format!(
                "selected task {task_id} is not the live task of owner {owner_id}"
            )));
            return self.push_turn(Turn::Dispatch);
        };

        self.track(
            Method::Execute,
            Call::Execute {
                owner: owner_id,
                task: task_id.clone(),
                priority,
            },
        );
        tracing::debug!(scheduler = %self.cfg.name, owner = %owner_name, task = %task_id, kind = task.kind(), priority, "executing task");

        let step = self.run_body(owner_id, &mut task, |task| {
            task.execute(&origin, ExecMode::Turn)
        });
        self.after_step(owner_id, task, step, started);
    }

    fn resume(&self, owner_id: OwnerId, task_id: TaskId, started: Instant) {
        let taken = {
            let mut state = self.state.borrow_mut();
            state
                .owners
                .get_mut(&owner_id)
                .and_then(|owner| owner.take_live(&task_id))
        };

        // Cancelled or unregistered while suspended.
        let Some(mut task) = taken else {
            tracing::debug!(scheduler = %self.cfg.name, task = %task_id, "suspended task is gone");
            return self.push_turn(Turn::Dispatch);
        };

        self.track(Method::Resume, Call::Resume { task: task_id });

        let step = self.run_body(owner_id, &mut task, |task| task.resume(ExecMode::Turn));
        self.after_step(owner_id, task, step, started);
    }

    /// Runs user code with the thread-local context entered and no borrow of
    /// the scheduler state held. If the body panics the live slot is cleared
    /// and dispatching continues on the next turn.
    fn run_body(
        &self,
        owner_id: OwnerId,
        task: &mut Box<dyn Executable>,
        f: impl FnOnce(&mut Box<dyn Executable>) -> Step,
    ) -> Step {
        let task_id = task.id().clone();

        let mut on_panic = ScopeGuard::new(|| {
            tracing::error!(scheduler = %self.cfg.name, task = %task_id, "task panicked, cancelling it");

            if let Ok(mut state) = self.state.try_borrow_mut() {
                if let Some(owner) = state.owners.get_mut(&owner_id) {
                    owner.abandon_live(&task_id);
                }

                if !state.shut_down {
                    state.turns.push_back(Turn::Dispatch);
                }
            }
        });

        let step = {
            let _ctx = context::enter(self, &task_id);
            f(task)
        };

        on_panic.disarm();
        step
    }

    fn after_step(
        &self,
        owner_id: OwnerId,
        task: Box<dyn Executable>,
        step: Step,
        started: Instant,
    ) {
        match step {
            Step::Complete(result) => self.finish(owner_id, task, result, started),
            Step::Yield => {
                let task_id = task.id().clone();
                tracing::trace!(scheduler = %self.cfg.name, task = %task_id, "yielding");
                self.track(Method::Yield, Call::Yield { task: task_id.clone() });

                let restored = {
                    let mut state = self.state.borrow_mut();
                    match state.owners.get_mut(&owner_id) {
                        Some(owner) => owner.restore_live(task).is_ok(),
                        None => false,
                    }
                };

                if restored {
                    self.push_turn(Turn::Resume {
                        owner: owner_id,
                        task: task_id,
                        started,
                    });
                } else {
                    self.push_turn(Turn::Dispatch);
                }
            }
            Step::Halted => {
                let paused = task.state() == TaskState::Paused;
                tracing::debug!(scheduler = %self.cfg.name, task = %task.id(), state = %task.state(), "task halted");

                let dropped = {
                    let mut state = self.state.borrow_mut();
                    match state.owners.get_mut(&owner_id) {
                        Some(owner) if paused => {
                            owner.requeue_front(task);
                            None
                        }
                        Some(owner) => {
                            owner.abandon_live(task.id());
                            Some(task)
                        }
                        None => Some(task),
                    }
                };

                drop(dropped);
                self.push_turn(Turn::Dispatch);
            }
            Step::Cached(_) => {
                let unrecorded = {
                    let mut state = self.state.borrow_mut();
                    match state.owners.get_mut(&owner_id) {
                        Some(owner) if task.is_complete() => {
                            owner.completed(task, false);
                            None
                        }
                        Some(owner) => {
                            owner.abandon_live(task.id());
                            Some(task)
                        }
                        None => Some(task),
                    }
                };

                drop(unrecorded);
                self.push_turn(Turn::Dispatch);
            }
        }
    }

    /// Records the task with its owner, fires its callback and then the
    /// timing-wrapped continuation that queues the next dispatch pass.
    fn finish(
        &self,
        owner_id: OwnerId,
        mut task: Box<dyn Executable>,
        result: Value,
        started: Instant,
    ) {
        let task_id = task.id().clone();
        let callback = task.take_callback();

        let unrecorded = {
            let mut state = self.state.borrow_mut();
            match state.owners.get_mut(&owner_id) {
                Some(owner) => {
                    if !owner.completed(task, false) {
                        tracing::warn!(scheduler = %self.cfg.name, owner = %owner.name(), task = %task_id, "completion not recorded");
                    }
                    None
                }
                None => Some(task),
            }
        };
        drop(unrecorded);

        self.track(
            Method::Complete,
            Call::Complete {
                owner: owner_id,
                task: task_id.clone(),
            },
        );

        // Also runs if the callback panics.
        let _continuation = ScopeGuard::new(|| self.continuation(&task_id, started));

        if let Some(callback) = callback {
            callback(&result);
        }
    }

    fn continuation(&self, task_id: &TaskId, started: Instant) {
        let elapsed = started.elapsed();

        if elapsed > self.cfg.slow_task_threshold {
            tracing::warn!(scheduler = %self.cfg.name, task = %task_id, ?elapsed, "slow task");
        } else {
            tracing::debug!(scheduler = %self.cfg.name, task = %task_id, ?elapsed, "task complete");
        }

        self.push_turn(Turn::Dispatch);
    }
}
