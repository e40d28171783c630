//! Step abstraction and per-step options.

use std::time::Duration;

use crate::clock::Timestamp;
use crate::error::StepFault;
use crate::tick::Frame;

use super::StepScheduler;

/// What a step asks the scheduler to do after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The step finished; the next step may run on a later tick.
    Done,
    /// Attempt again later. `None` uses the step's configured retry delay.
    Retry(Option<Duration>),
    /// Give up. The whole queue is cleared.
    Aborted(String),
}

impl Outcome {
    #[inline]
    pub fn retry() -> Self {
        Outcome::Retry(None)
    }

    #[inline]
    pub fn retry_after(delay: Duration) -> Self {
        Outcome::Retry(Some(delay))
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Outcome::Aborted(reason.into())
    }

    /// Maps a readiness check onto `Done` / `Retry`.
    #[inline]
    pub fn done_if(ready: bool) -> Self {
        if ready { Outcome::Done } else { Outcome::retry() }
    }
}

pub type StepResult = Result<Outcome, StepFault>;

/// One resumable unit of work.
///
/// Steps must not block. Waiting is expressed by returning
/// [`Outcome::Retry`] and letting the scheduler call again on a later tick.
pub trait Step: Send {
    fn run(&mut self, ctx: &mut StepContext<'_>) -> StepResult;
}

impl<F> Step for F
where
    F: FnMut(&mut StepContext<'_>) -> StepResult + Send,
{
    #[inline]
    fn run(&mut self, ctx: &mut StepContext<'_>) -> StepResult {
        self(ctx)
    }
}

/// What a running step can see about its surroundings.
pub struct StepContext<'a> {
    pub(super) frame: &'a Frame,
    pub(super) scheduler: &'a StepScheduler,
    pub(super) name: &'a str,
    pub(super) attempt: u32,
}

impl StepContext<'_> {
    pub fn now(&self) -> Timestamp {
        self.frame.now
    }

    pub fn frame(&self) -> &Frame {
        self.frame
    }

    /// Zero on the first attempt, incremented on every retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn step_name(&self) -> &str {
        self.name
    }

    /// The scheduler executing this step. Enqueuing or aborting through it
    /// from inside the step is allowed.
    pub fn scheduler(&self) -> &StepScheduler {
        self.scheduler
    }
}

/// Per-step overrides. Unset fields fall back to the scheduler defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOptions {
    pub time_limit: Option<Duration>,
    pub abort_on_timeout: Option<bool>,
    pub priority: Option<u8>,
    pub retry_delay: Duration,
}

impl StepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn abort_on_timeout(mut self, abort: bool) -> Self {
        self.abort_on_timeout = Some(abort);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Delay applied to `Outcome::Retry(None)`.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}
