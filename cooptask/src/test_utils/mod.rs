#![allow(unused)]

use crate::runtime::{Builder, Handle, InvariantPolicy};
use crate::task::Origin;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

static TRACING: Once = Once::new();

/// Routes scheduler logs to the test harness output. Filter with `RUST_LOG`.
pub(crate) fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub(crate) fn origin(name: &'static str) -> Origin {
    Rc::new(name)
}

pub(crate) fn init_scheduler() -> Handle {
    init_tracing();
    Builder::new()
        .name("test")
        .invariant_policy(InvariantPolicy::Panic)
        .try_build()
        .expect("failed to build scheduler")
}

/// Shared, append-only log written to by task bodies and callbacks.
#[derive(Debug, Clone)]
pub(crate) struct Recorder<T>(Rc<RefCell<Vec<T>>>);

impl<T: Clone> Recorder<T> {
    pub(crate) fn new() -> Self {
        Self(Rc::new(RefCell::new(Vec::new())))
    }

    pub(crate) fn push(&self, item: T) {
        self.0.borrow_mut().push(item);
    }

    pub(crate) fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.0.borrow().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.borrow().len()
    }
}
