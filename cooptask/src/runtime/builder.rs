use crate::runtime::Handle;
use crate::task::iteration::DEFAULT_STEP;
use anyhow::{Result, anyhow};
use std::convert::TryFrom;
use std::num::NonZeroUsize;
use std::time::Duration;

/// One host frame at 60Hz.
const SLOW_TASK_THRESHOLD: Duration = Duration::from_millis(16);

const DEFAULT_NAME: &str = "cooptask";

/// What the scheduler does when its own bookkeeping turns out inconsistent,
/// e.g. an owner's FIFO order references a task that no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantPolicy {
    /// Fail fast. Default in debug builds.
    Panic,

    /// Log at `error` level, drop the inconsistent entry and keep dispatching.
    /// Default in release builds.
    LogAndSkip,
}

impl Default for InvariantPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            InvariantPolicy::Panic
        } else {
            InvariantPolicy::LogAndSkip
        }
    }
}

#[derive(Debug)]
pub struct Builder {
    /// Tags every log line emitted by the scheduler.
    name: String,

    /// Elements applied per turn by iteration tasks that do not set a step.
    default_step: NonZeroUsize,

    /// Tasks whose continuation fires later than this after dispatch are
    /// reported at `warn` level.
    slow_task_threshold: Duration,

    invariant_policy: InvariantPolicy,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            default_step: DEFAULT_STEP,
            slow_task_threshold: SLOW_TASK_THRESHOLD,
            invariant_policy: InvariantPolicy::default(),
        }
    }

    pub fn name(mut self, val: impl Into<String>) -> Self {
        self.name = val.into();
        self
    }

    #[track_caller]
    pub fn default_step(mut self, val: usize) -> Self {
        assert!(val > 0, "default_step must be greater than 0");
        self.default_step = NonZeroUsize::new(val).unwrap_or(DEFAULT_STEP);
        self
    }

    pub fn slow_task_threshold(mut self, val: Duration) -> Self {
        self.slow_task_threshold = val;
        self
    }

    pub fn invariant_policy(mut self, val: InvariantPolicy) -> Self {
        self.invariant_policy = val;
        self
    }

    /// Creates an idle scheduler. Nothing runs until the host drives turns.
    pub fn try_build(self) -> Result<Handle> {
        let cfg = SchedulerConfig::try_from(self)?;
        Ok(Handle::new(cfg))
    }
}

/// Validated builder settings, shared by the scheduler and its owners.
#[derive(Debug, Clone)]
pub(crate) struct SchedulerConfig {
    pub(crate) name: String,
    pub(crate) default_step: NonZeroUsize,
    pub(crate) slow_task_threshold: Duration,
    pub(crate) invariant_policy: InvariantPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            name: DEFAULT_NAME.to_string(),
            default_step: DEFAULT_STEP,
            slow_task_threshold: SLOW_TASK_THRESHOLD,
            invariant_policy: InvariantPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("scheduler name must not be empty"));
        }

        if self.slow_task_threshold.is_zero() {
            return Err(anyhow!("slow_task_threshold must be greater than 0"));
        }

        Ok(())
    }
}

impl TryFrom<Builder> for SchedulerConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let cfg = SchedulerConfig {
            name: builder.name,
            default_step: builder.default_step,
            slow_task_threshold: builder.slow_task_threshold,
            invariant_policy: builder.invariant_policy,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}
