use crate::task::{OwnerId, TaskId};
use serde_json::Value;
use std::fmt;

/// Fired once every task of a [`Handle::require_task`] call has been
/// resolved. Receives the collected results when `pass_results` is set.
///
/// [`Handle::require_task`]: crate::runtime::Handle::require_task
pub type RequireCallback = Box<dyn FnOnce(Option<Vec<Value>>)>;

/// Options of [`Handle::require_task`].
///
/// [`Handle::require_task`]: crate::runtime::Handle::require_task
#[derive(Default)]
pub struct RequireOptions {
    pub(crate) immediate: bool,
    pub(crate) pass_results: bool,
    pub(crate) callback: Option<RequireCallback>,
}

impl RequireOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the tasks inline, back-to-back, before `require_task` returns
    /// instead of queueing a priority request.
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn pass_results(mut self, pass_results: bool) -> Self {
        self.pass_results = pass_results;
        self
    }

    pub fn on_done(mut self, f: impl FnOnce(Option<Vec<Value>>) + 'static) -> Self {
        self.callback = Some(Box::new(f));
        self
    }

    /// Splits off the callback together with what it should receive.
    pub(crate) fn into_callback(
        self,
        results: &[Value],
    ) -> Option<(RequireCallback, Option<Vec<Value>>)> {
        let pass_results = self.pass_results;
        self.callback
            .map(|callback| (callback, pass_results.then(|| results.to_vec())))
    }
}

impl fmt::Debug for RequireOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequireOptions")
            .field("immediate", &self.immediate)
            .field("pass_results", &self.pass_results)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// A queued, asynchronous `require_task` call. Serviced before any owner
/// task, in submission order.
pub(crate) struct PriorityRequest {
    pub(crate) owner: OwnerId,
    task_ids: Vec<TaskId>,
    opts: RequireOptions,
    results: Vec<Value>,
    current_idx: usize,
}

impl PriorityRequest {
    pub(crate) fn new(owner: OwnerId, task_ids: Vec<TaskId>, opts: RequireOptions) -> Self {
        Self {
            owner,
            results: Vec::with_capacity(task_ids.len()),
            task_ids,
            opts,
            current_idx: 0,
        }
    }

    /// Next task id still to be resolved.
    pub(crate) fn next_id(&self) -> Option<&TaskId> {
        self.task_ids.get(self.current_idx)
    }

    pub(crate) fn accept(&mut self, result: Value) {
        self.results.push(result);
        self.current_idx += 1;
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.current_idx >= self.task_ids.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.task_ids.len()
    }

    /// Invokes the callback, if any. Must not be called while the scheduler
    /// state is borrowed.
    pub(crate) fn fire(self) {
        debug_assert!(self.is_exhausted());

        if let Some((callback, results)) = self.opts.into_callback(&self.results) {
            callback(results);
        }
    }
}

impl fmt::Debug for PriorityRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityRequest")
            .field("owner", &self.owner)
            .field("task_ids", &self.task_ids)
            .field("opts", &self.opts)
            .field("results", &self.results)
            .field("current_idx", &self.current_idx)
            .finish()
    }
}
