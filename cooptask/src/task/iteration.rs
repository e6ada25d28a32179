//! Chunked iteration over a collection.
//!
//! An [`IterationTask`] applies its [`Iteratee`] to one element at a time and
//! hands control back to the scheduler every `step` elements, so a long
//! traversal is spread over many host turns instead of stalling one.
//!
//! # Hazard
//!
//! Only the *scheduling* of each element is sequenced. If the iteratee kicks
//! off asynchronous work of its own (e.g. posts a message and returns), that
//! work is not awaited and runs concurrently with the following elements.
use crate::error::SchedulerError;
use crate::task::{
    ExecMode, Executable, Header, Origin, Step, TaskCallback, TaskId, TaskState,
};
use serde_json::{Map, Value};
use std::fmt;
use std::num::NonZeroUsize;

pub(crate) const DEFAULT_STEP: NonZeroUsize = NonZeroUsize::MIN;

/// Position of an element in the iterated collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(usize),
    Name(String),
}

impl From<&Key> for Value {
    fn from(key: &Key) -> Self {
        match key {
            Key::Index(idx) => Value::from(*idx),
            Key::Name(name) => Value::from(name.as_str()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(idx) => idx.fmt(f),
            Key::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterationType {
    Each,
    Map,
    Reduce,
}

/// One element of the iterated collection, as handed to an [`Iteratee`].
pub struct Element<'a> {
    value: &'a Value,
    key: &'a Key,
    collection: &'a Value,
    context: &'a Origin,
}

impl<'a> Element<'a> {
    pub fn value(&self) -> &'a Value {
        self.value
    }

    pub fn key(&self) -> &'a Key {
        self.key
    }

    /// The whole collection being iterated.
    pub fn collection(&self) -> &'a Value {
        self.collection
    }

    /// The task's context override, or its owner's origin.
    pub fn context(&self) -> &'a Origin {
        self.context
    }

    pub fn context_as<T: 'static>(&self) -> Option<&'a T> {
        self.context.downcast_ref::<T>()
    }
}

impl fmt::Debug for Element<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("key", self.key)
            .field("value", self.value)
            .finish_non_exhaustive()
    }
}

/// Function applied to every element. `Reduce` additionally receives the
/// accumulator first and returns the next one.
pub enum Iteratee {
    Each(Box<dyn FnMut(&Element<'_>)>),
    Map(Box<dyn FnMut(&Element<'_>) -> Value>),
    Reduce(Box<dyn FnMut(Value, &Element<'_>) -> Value>),
}

impl Iteratee {
    pub fn each(f: impl FnMut(&Element<'_>) + 'static) -> Self {
        Iteratee::Each(Box::new(f))
    }

    pub fn map(f: impl FnMut(&Element<'_>) -> Value + 'static) -> Self {
        Iteratee::Map(Box::new(f))
    }

    pub fn reduce(f: impl FnMut(Value, &Element<'_>) -> Value + 'static) -> Self {
        Iteratee::Reduce(Box::new(f))
    }

    pub fn iteration_type(&self) -> IterationType {
        match self {
            Iteratee::Each(_) => IterationType::Each,
            Iteratee::Map(_) => IterationType::Map,
            Iteratee::Reduce(_) => IterationType::Reduce,
        }
    }
}

impl fmt::Debug for Iteratee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Iteratee")
            .field(&self.iteration_type())
            .finish()
    }
}

/// Iteration parameters of a [`TaskSpec`](crate::task::TaskSpec).
#[derive(Debug)]
pub struct IterateSpec {
    pub(crate) list: Value,
    pub(crate) iteratee: Iteratee,
    pub(crate) step: Option<NonZeroUsize>,
    pub(crate) seed: Value,
}

impl IterateSpec {
    pub fn new(list: Value, iteratee: Iteratee) -> Self {
        Self {
            list,
            iteratee,
            step: None,
            seed: Value::Null,
        }
    }

    /// Number of elements applied per turn. Falls back to the scheduler's
    /// `default_step` when unset.
    #[track_caller]
    pub fn step(mut self, val: usize) -> Self {
        assert!(val > 0, "step must be greater than 0");
        self.step = NonZeroUsize::new(val);
        self
    }

    /// Initial accumulator of a `Reduce` iteration.
    pub fn seed(mut self, seed: Value) -> Self {
        self.seed = seed;
        self
    }
}

/// Decided once at construction. Keys of a mapping are snapshotted so the
/// traversal order never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Shape {
    Sequence(usize),
    Keyed(Vec<String>),
}

impl Shape {
    fn of(list: &Value) -> Option<Self> {
        match list {
            Value::Array(items) => Some(Shape::Sequence(items.len())),
            Value::Object(map) => Some(Shape::Keyed(map.keys().cloned().collect())),
            _ => None,
        }
    }

    fn len(&self) -> usize {
        match self {
            Shape::Sequence(len) => *len,
            Shape::Keyed(keys) => keys.len(),
        }
    }

    fn empty_like(&self) -> Value {
        match self {
            Shape::Sequence(len) => Value::Array(Vec::with_capacity(*len)),
            Shape::Keyed(_) => Value::Object(Map::new()),
        }
    }
}

/// A task that repeats its iteratee over a collection in chunks of `step`.
pub struct IterationTask {
    header: Header,

    list: Value,

    shape: Shape,

    iteratee: Option<Iteratee>,

    step: NonZeroUsize,

    /// Resolved on the first `execute` and kept for the resume turns.
    context: Option<Origin>,

    /// `None` before the first element, `Some(len)` once done. Only increases.
    cursor: Option<usize>,
}

impl IterationTask {
    pub(crate) fn try_new(
        mut header: Header,
        spec: IterateSpec,
        default_step: NonZeroUsize,
    ) -> Result<Self, SchedulerError> {
        let Some(shape) = Shape::of(&spec.list) else {
            return Err(SchedulerError::NotIterable { task: header.id });
        };

        header.result = match spec.iteratee.iteration_type() {
            IterationType::Each => None,
            IterationType::Map => Some(shape.empty_like()),
            IterationType::Reduce => Some(spec.seed),
        };

        Ok(Self {
            header,
            list: spec.list,
            shape,
            iteratee: Some(spec.iteratee),
            step: spec.step.unwrap_or(default_step),
            context: None,
            cursor: None,
        })
    }

    pub fn len(&self) -> usize {
        self.shape.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn step(&self) -> usize {
        self.step.get()
    }

    pub fn current_iteration(&self) -> Option<usize> {
        self.cursor
    }

    pub fn iteration_type(&self) -> Option<IterationType> {
        self.iteratee.as_ref().map(Iteratee::iteration_type)
    }

    /// Applies elements until the collection is exhausted, the task stops
    /// being runnable, or (in [`ExecMode::Turn`]) a step boundary is reached.
    fn run_chunk(&mut self, mode: ExecMode) -> Step {
        let len = self.len();

        loop {
            if !self.header.state.can_progress() {
                tracing::debug!(task = %self.header.id, state = %self.header.state, "iteration halted");
                return Step::Halted;
            }

            // Never executed, nothing to continue.
            let Some(context) = self.context.clone() else {
                return Step::Cached(self.header.result.clone());
            };

            let idx = self.cursor.unwrap_or_default();
            if idx >= len {
                return self.finish();
            }

            self.apply(idx, &context);

            let next = idx + 1;
            self.cursor = Some(next);

            if next == len {
                return self.finish();
            }

            if mode == ExecMode::Turn && next % self.step.get() == 0 {
                tracing::trace!(task = %self.header.id, cursor = next, len, "iteration yield");
                return Step::Yield;
            }
        }
    }

    fn apply(&mut self, idx: usize, context: &Origin) {
        let Self {
            header,
            list,
            shape,
            iteratee,
            ..
        } = self;
        let list = &*list;

        let Some(iteratee) = iteratee.as_mut() else {
            return;
        };

        let (value, key) = match shape {
            Shape::Sequence(_) => (&list[idx], Key::Index(idx)),
            Shape::Keyed(keys) => (&list[keys[idx].as_str()], Key::Name(keys[idx].clone())),
        };

        let element = Element {
            value,
            key: &key,
            collection: list,
            context,
        };

        match iteratee {
            Iteratee::Each(f) => f(&element),
            Iteratee::Map(f) => {
                let mapped = f(&element);
                match (header.result.as_mut(), &key) {
                    (Some(Value::Array(out)), Key::Index(_)) => out.push(mapped),
                    (Some(Value::Object(out)), Key::Name(name)) => {
                        out.insert(name.clone(), mapped);
                    }
                    _ => debug_assert!(false, "map output does not match input shape"),
                }
            }
            Iteratee::Reduce(f) => {
                let acc = header.result.take().unwrap_or_default();
                header.result = Some(f(acc, &element));
            }
        }
    }

    fn finish(&mut self) -> Step {
        self.cursor = Some(self.len());
        self.context = None;
        self.header.state.transition_to_complete();

        Step::Complete(self.header.result.clone().unwrap_or_default())
    }
}

impl Executable for IterationTask {
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

    fn execute(&mut self, origin: &Origin, mode: ExecMode) -> Step {
        if !self.header.state.transition_to_active() {
            return Step::Cached(self.header.result.clone());
        }

        if self.cursor.is_none() {
            self.cursor = Some(0);
        }

        let context = self.header.context.as_ref().unwrap_or(origin);
        self.context = Some(context.clone());

        self.run_chunk(mode)
    }

    fn resume(&mut self, mode: ExecMode) -> Step {
        match self.header.state {
            // Unpaused before its resume turn came up.
            TaskState::Pending => {
                self.header.state.transition_to_active();
                self.run_chunk(mode)
            }
            TaskState::Active => self.run_chunk(mode),
            TaskState::Complete => Step::Cached(self.header.result.clone()),
            TaskState::Paused | TaskState::Cancelled => Step::Halted,
        }
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
        self.iteratee = None;
        self.context = None;
        self.list = Value::Null;
    }

    fn kind(&self) -> &'static str {
        "iteration"
    }
}

impl fmt::Debug for IterationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationTask")
            .field("header", &self.header)
            .field("iteratee", &self.iteratee)
            .field("len", &self.len())
            .field("step", &self.step)
            .field("cursor", &self.cursor)
            .finish()
    }
}
