//! Thread-local view of the scheduler turn currently being driven on this
//! thread, so task bodies can reach back into their scheduler.
use crate::runtime::Handle;
use crate::task::TaskId;
use crate::utils::ScopeGuard;
use std::cell::RefCell;
use std::thread_local;

#[derive(Default)]
struct Context {
    scheduler: Option<Handle>,
    task: Option<TaskId>,
}

thread_local! {
    static CONTEXT: RefCell<Context> = RefCell::new(Context::default());
}

/// Returns the scheduler driving the current turn, if any.
///
/// Only set while a task body runs from [`Handle::run_turn`] or an immediate
/// [`Handle::require_task`].
pub fn current() -> Option<Handle> {
    CONTEXT.with(|ctx| ctx.borrow().scheduler.clone())
}

pub(crate) fn current_task_id() -> Option<TaskId> {
    CONTEXT.with(|ctx| ctx.borrow().task.clone())
}

/// Enters a task body. The previous context is restored when the guard drops,
/// which also happens while unwinding out of a panicking body.
pub(crate) fn enter(scheduler: &Handle, task: &TaskId) -> ScopeGuard<'static, impl FnOnce()> {
    let prev = CONTEXT.with(|ctx| {
        std::mem::replace(
            &mut *ctx.borrow_mut(),
            Context {
                scheduler: Some(scheduler.clone()),
                task: Some(task.clone()),
            },
        )
    });

    ScopeGuard::new(move || {
        // Ignore failures during thread teardown.
        let _ = CONTEXT.try_with(|ctx| *ctx.borrow_mut() = prev);
    })
}
