//! Cooperative, single-threaded task scheduling.
//!
//! Work is queued on [`Owner`](owner::Owner)s registered with a scheduler
//! [`Handle`]. The host drives the scheduler one turn at a time; every turn
//! runs at most one task body, or one chunk of an iteration task, before
//! control returns to the host.
//!
//! ```
//! use cooptask::task::{IterateSpec, Iteratee, TaskSpec};
//! use serde_json::json;
//! use std::rc::Rc;
//!
//! let scheduler = cooptask::Builder::new().try_build()?;
//! let owner = scheduler.register("ui", Rc::new(()))?;
//!
//! let double = Iteratee::map(|e| json!(e.value().as_i64().unwrap_or(0) * 2));
//! let doubled = scheduler.add_task(
//!     owner,
//!     TaskSpec::iterate(IterateSpec::new(json!([1, 2, 3]), double).step(2)),
//! )?;
//!
//! scheduler.run_until_idle();
//! assert_eq!(scheduler.task_result(owner, &doubled), Some(json!([2, 4, 6])));
//! # Ok::<(), anyhow::Error>(())
//! ```
mod context;
pub use context::current;

pub mod error;
pub use error::SchedulerError;

pub mod owner;

pub mod runtime;
pub use runtime::{Builder, Handle, InvariantPolicy, RequireOptions};

pub mod task;

mod utils;

#[cfg(test)]
mod test_utils;
