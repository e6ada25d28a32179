use std::marker::PhantomData;

/// Runs a closure when it goes out of scope, including while unwinding.
///
/// Armed on creation. [`ScopeGuard::disarm`] turns it into a no-op, which is
/// how the happy path opts out of cleanup that only an early exit needs.
pub(crate) struct ScopeGuard<'a, F: FnOnce()> {
    // Taken on drop or disarm so the closure runs at most once.
    closure: Option<F>,

    _p: PhantomData<&'a ()>,
}

impl<'a, F: FnOnce()> ScopeGuard<'a, F> {
    pub(crate) fn new(closure: F) -> Self {
        ScopeGuard {
            closure: Some(closure),
            _p: PhantomData,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.closure.take();
    }
}

impl<'a, F: FnOnce()> Drop for ScopeGuard<'a, F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}
