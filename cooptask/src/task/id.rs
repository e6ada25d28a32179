use crate::context;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::{borrow::Borrow, fmt};

/// Identifies a task within the process.
///
/// Callers may supply their own ids (e.g. `"load-avatar"`) when they intend to
/// refer to a task later through [`Handle::require_task`]. Otherwise an id is
/// generated from a process-wide monotonic counter.
///
/// # Notes
///
/// - Generated ids are unique for the whole process. Caller-supplied ids are
///   only checked for uniqueness within their owner.
/// - The id of the task currently executing can be obtained from inside the
///   task body via [`task::try_id()`](crate::task::try_id()).
///
/// [`Handle::require_task`]: crate::runtime::Handle::require_task
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct TaskId(Arc<str>);

impl TaskId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(Arc::from(format!("task-{id}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        TaskId::new(id)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Returns the [`TaskId`] of the task body currently executing on this thread,
/// or `None` when called outside of a task.
pub fn try_id() -> Option<TaskId> {
    context::current_task_id()
}

/// Identifies an [`Owner`] registered on a scheduler.
///
/// [`Owner`]: crate::owner::Owner
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct OwnerId(NonZeroU64);

impl OwnerId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Self(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique owner ID: bitspace exhausted")
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_task_ids_unique() {
        let n = 13;
        let ids = (0..n).map(|_| TaskId::next()).collect::<HashSet<_>>();
        assert_eq!(ids.len(), n);
    }

    #[test]
    fn test_generated_owner_ids_monotonic() {
        let a = OwnerId::next();
        let b = OwnerId::next();
        assert!(b > a);
    }

    #[test]
    fn test_caller_supplied_task_id() {
        let id = TaskId::from("t1");
        assert_eq!(id.as_str(), "t1");
        assert_eq!(id, TaskId::new(String::from("t1")));
        assert_eq!(id.to_string(), "t1");
    }
}
