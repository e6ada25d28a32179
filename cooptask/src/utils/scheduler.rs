#![allow(unused)]

use crate::task::{OwnerId, TaskId};
#[cfg(test)]
use dashmap::DashMap;
#[cfg(test)]
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    Dispatch,
    Execute,
    Yield,
    Resume,
    Rotate,
    Idle,
    Complete,
    RequestDone,
}

#[cfg(test)]
const METHODS: [Method; 8] = [
    Method::Dispatch,
    Method::Execute,
    Method::Yield,
    Method::Resume,
    Method::Rotate,
    Method::Idle,
    Method::Complete,
    Method::RequestDone,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Dispatch,
    Execute {
        owner: OwnerId,
        task: TaskId,
        priority: bool,
    },
    Yield {
        task: TaskId,
    },
    Resume {
        task: TaskId,
    },
    Rotate {
        owner: OwnerId,
    },
    Idle,
    Complete {
        owner: OwnerId,
        task: TaskId,
    },
    RequestDone {
        owner: OwnerId,
        num_tasks: usize,
    },
}

/// Spy on the dispatcher, only compiled into tests.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    calls: Arc<DashMap<Method, Vec<Call>>>,
}

#[cfg(test)]
impl Tracker {
    pub(crate) fn new() -> Self {
        let map = DashMap::new();
        for method in METHODS {
            map.insert(method, Vec::new());
        }

        Self {
            calls: Arc::new(map),
        }
    }

    pub(crate) fn record(&self, method: Method, call: Call) {
        self.calls
            .get_mut(&method)
            .expect("method not found")
            .push(call)
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls
            .get(method)
            .expect("method not found")
            .value()
            .clone()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.get(method).map_or(0, |calls| calls.len())
    }

    /// Task ids in the order they started executing.
    pub(crate) fn executed(&self) -> Vec<TaskId> {
        self.get_calls(&Method::Execute)
            .into_iter()
            .filter_map(|call| match call {
                Call::Execute { task, .. } => Some(task),
                _ => None,
            })
            .collect()
    }
}
