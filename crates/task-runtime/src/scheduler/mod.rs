//! Per-feature step scheduler.
//!
//! A [`StepScheduler`] owns a queue of [`Step`]s and advances it by at most one
//! step per frame. Steps may retry with a delay, the whole queue can be
//! aborted from anywhere (including from inside the running step), and a
//! step still queued once its time limit has elapsed since it was enqueued
//! fails the queue.
//!
//! # Deadlines
//!
//! Each step's deadline is its enqueue time plus its time limit. Every tick
//! checks the deadlines of all queued steps, including those still waiting
//! in a lower lane. A scheduler built without a clock stamps steps from the
//! last frame it saw, or from the next frame if it has not ticked yet.
//!
//! # Queue lifecycle
//!
//! ```text
//! Idle --enqueue--> Running --Done, queue empty--------> Idle
//!                   Running --Retry--------------------> Running
//!                   Running --Aborted/fault/timeout----> Idle (queue cleared)
//! ```
//!
//! # Re-entrancy
//!
//! No lock is held while a step body runs. A generation counter is bumped on
//! every abort; a step whose generation no longer matches when it returns is
//! discarded instead of being re-queued.

mod queue;
mod step;

pub use step::{Outcome, Step, StepContext, StepOptions, StepResult};

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::arbiter::{Claim, ConflictArbiter};
use crate::clock::{Clock, Timestamp, duration_millis};
use crate::config::RuntimeConfig;
use crate::events::{EventBus, SchedulerEvent};
use crate::tick::{Frame, SubscriptionId, TickSource};

use queue::{Entry, InitialDelay, Lanes};

/// Coarse queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Why a queue was cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The step returned [`Outcome::Aborted`].
    Aborted(String),
    /// The step returned a [`StepFault`](crate::StepFault).
    Fault(String),
    /// The step panicked.
    Panicked(String),
    /// The step was still queued past its enqueue time plus its time limit.
    TimedOut(Duration),
}

impl FailureReason {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureReason::TimedOut(_))
    }
}

/// Failure signal kept for the owning feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueFailure {
    pub step: String,
    pub reason: FailureReason,
    /// Steps discarded along with the failing one.
    pub discarded: usize,
}

/// Defaults applied to steps enqueued without explicit options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerDefaults {
    pub time_limit: Duration,
    pub priority: u8,
    pub abort_on_timeout: bool,
}

impl From<&RuntimeConfig> for SchedulerDefaults {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            time_limit: config.default_time_limit,
            priority: config.default_priority,
            abort_on_timeout: config.abort_on_timeout,
        }
    }
}

impl Default for SchedulerDefaults {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

#[derive(Default)]
struct QueueState {
    /// Step being retried or waiting out its delay.
    current: Option<Entry>,
    lanes: Lanes,
    generation: u64,
    /// Generation of the step executing right now, if any.
    in_flight: Option<u64>,
    in_flight_name: Option<String>,
    pending_delay: InitialDelay,
    /// Time of the most recent frame, used to stamp deadlines without a clock.
    last_seen: Option<Timestamp>,
    last_failure: Option<QueueFailure>,
    claims: Vec<(Arc<ConflictArbiter>, String)>,
    subscription: Option<SubscriptionId>,
}

impl QueueState {
    fn queued(&self) -> usize {
        self.lanes.len() + usize::from(self.current.is_some())
    }

    fn is_busy(&self) -> bool {
        self.queued() > 0 || self.in_flight == Some(self.generation)
    }

    /// Empties the queue and invalidates the in-flight step.
    fn clear(&mut self) -> usize {
        let discarded = self.lanes.clear() + usize::from(self.current.take().is_some());
        self.generation = self.generation.wrapping_add(1);
        self.pending_delay = InitialDelay::default();
        discarded
    }

    /// Stamps steps enqueued before the scheduler knew the time.
    fn stamp_deadlines(&mut self, now: Timestamp) {
        if let Some(entry) = self.current.as_mut() {
            entry.stamp(now);
        }
        for entry in self.lanes.iter_mut() {
            entry.stamp(now);
        }
    }

    fn take_expired(&mut self, now: Timestamp) -> Option<Entry> {
        if self.current.as_ref().is_some_and(|entry| entry.is_expired(now)) {
            return self.current.take();
        }
        self.lanes.take_expired(now)
    }
}

struct Inner {
    name: String,
    defaults: SchedulerDefaults,
    events: Option<EventBus>,
    clock: Option<Arc<dyn Clock>>,
    state: Mutex<QueueState>,
}

/// Cooperative FIFO of steps, advanced once per frame.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct StepScheduler {
    inner: Arc<Inner>,
}

enum Verdict {
    Completed,
    Retry(Duration),
    Failed(FailureReason),
}

impl StepScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_defaults(name, SchedulerDefaults::default(), None, None)
    }

    /// Builds a scheduler publishing to `events` and stamping deadlines
    /// from `clock`. Without a clock, frame times are used instead.
    pub fn with_defaults(
        name: impl Into<String>,
        defaults: SchedulerDefaults,
        events: Option<EventBus>,
        clock: Option<Arc<dyn Clock>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                defaults,
                events,
                clock,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Appends a step using the scheduler defaults.
    pub fn enqueue<F>(&self, name: impl Into<String>, step: F)
    where
        F: FnMut(&mut StepContext<'_>) -> StepResult + Send + 'static,
    {
        self.push(name.into(), Box::new(step), StepOptions::default(), false);
    }

    /// Appends a step with explicit time limit, timeout policy or priority.
    pub fn enqueue_with<F>(&self, name: impl Into<String>, options: StepOptions, step: F)
    where
        F: FnMut(&mut StepContext<'_>) -> StepResult + Send + 'static,
    {
        self.push(name.into(), Box::new(step), options, false);
    }

    /// Appends a step implemented as a type rather than a closure.
    pub fn enqueue_step(&self, name: impl Into<String>, options: StepOptions, step: impl Step + 'static) {
        self.push(name.into(), Box::new(step), options, false);
    }

    /// Places a step at the head of its lane, ahead of queued work of the
    /// same priority. A step currently being retried still finishes first.
    pub fn insert<F>(&self, name: impl Into<String>, options: StepOptions, step: F)
    where
        F: FnMut(&mut StepContext<'_>) -> StepResult + Send + 'static,
    {
        self.push(name.into(), Box::new(step), options, true);
    }

    fn push(&self, name: String, step: Box<dyn Step>, options: StepOptions, front: bool) {
        let defaults = self.inner.defaults;
        let clock_now = self.inner.clock.as_ref().map(|clock| clock.now());
        let mut state = self.inner.state.lock();
        let mut entry = Entry {
            name,
            step,
            priority: options.priority.unwrap_or(defaults.priority),
            time_limit: options.time_limit.unwrap_or(defaults.time_limit),
            abort_on_timeout: options.abort_on_timeout.unwrap_or(defaults.abort_on_timeout),
            retry_delay: options.retry_delay,
            initial_delay: std::mem::take(&mut state.pending_delay),
            ready_at: None,
            ready_frame: None,
            deadline: None,
            attempts: 0,
            armed: false,
        };
        if let Some(now) = clock_now.or(state.last_seen) {
            entry.stamp(now);
        }
        trace!(
            target: "task_runtime::scheduler",
            scheduler = %self.inner.name,
            step = %entry.name,
            priority = entry.priority,
            "enqueued"
        );
        if front {
            state.lanes.push_front(entry);
        } else {
            state.lanes.push_back(entry);
        }
    }

    /// Makes the next enqueued step wait `delay` after it reaches the head
    /// of the queue before its first attempt. Repeated calls add up.
    pub fn delay_next(&self, delay: Duration) {
        self.inner.state.lock().pending_delay.add_time(delay);
    }

    /// Like [`delay_next`](Self::delay_next), counted in frames. A pending
    /// time delay is kept; the step waits for both.
    pub fn delay_next_frames(&self, frames: u64) {
        self.inner.state.lock().pending_delay.add_frames(frames);
    }

    /// Empties the queue. A step executing right now is discarded when it
    /// returns, whatever its outcome.
    pub fn abort(&self) {
        let (was_busy, discarded, claims) = {
            let mut state = self.inner.state.lock();
            let was_busy = state.is_busy();
            let discarded = state.clear();
            (was_busy, discarded, std::mem::take(&mut state.claims))
        };

        if !was_busy {
            self.release_claims(claims);
            return;
        }
        debug!(
            target: "task_runtime::scheduler",
            scheduler = %self.inner.name,
            discarded,
            "aborted"
        );
        self.publish(SchedulerEvent::Aborted {
            scheduler: self.inner.name.clone(),
            discarded,
        });
        self.release_claims(claims);
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().is_busy()
    }

    pub fn state(&self) -> SchedulerState {
        if self.is_busy() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Steps waiting to run, including the current one.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queued()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the executing or current step.
    pub fn current_step_name(&self) -> Option<String> {
        let state = self.inner.state.lock();
        if let Some(name) = state.in_flight_name.as_ref()
            && state.in_flight == Some(state.generation)
        {
            return Some(name.clone());
        }
        state.current.as_ref().map(|entry| entry.name.clone())
    }

    /// Most recent failure, kept until the next one.
    pub fn last_failure(&self) -> Option<QueueFailure> {
        self.inner.state.lock().last_failure.clone()
    }

    /// Drops queued steps of one priority. The current step is unaffected.
    pub fn remove_lane(&self, priority: u8) -> usize {
        self.inner.state.lock().lanes.remove_lane(priority)
    }

    /// Claims `key` on behalf of this scheduler and releases it automatically
    /// when the queue next becomes idle: drained, failed, aborted or detached.
    ///
    /// Release is driven by queue activity, so enqueue the guarded steps
    /// right after claiming. If nothing ends up enqueued, call
    /// [`abort`](Self::abort) (or release the key on the arbiter) straight
    /// away; an idle queue otherwise holds the claim until its next drain.
    pub fn bind_claim(&self, arbiter: &Arc<ConflictArbiter>, key: &str) -> Claim {
        let claim = arbiter.try_claim(key, &self.inner.name);
        if claim == Claim::Acquired {
            self.inner
                .state
                .lock()
                .claims
                .push((Arc::clone(arbiter), key.to_owned()));
        }
        claim
    }

    /// Subscribes this scheduler to `source`. Re-attaching replaces the
    /// previous subscription id; detach from the old source first.
    pub fn attach(&self, source: &dyn TickSource) -> SubscriptionId {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = source.subscribe(Arc::new(move |frame: &Frame| {
            if let Some(inner) = weak.upgrade() {
                StepScheduler { inner }.tick(frame);
            }
        }));
        self.inner.state.lock().subscription = Some(id);
        id
    }

    /// Unsubscribes from `source` and aborts outstanding work.
    pub fn detach(&self, source: &dyn TickSource) {
        let subscription = self.inner.state.lock().subscription.take();
        if let Some(id) = subscription {
            source.unsubscribe(id);
        }
        self.abort();
    }

    /// Advances the queue by at most one step.
    pub fn tick(&self, frame: &Frame) {
        let (mut entry, generation) = {
            let mut state = self.inner.state.lock();
            if state.in_flight.is_some() {
                trace!(target: "task_runtime::scheduler", scheduler = %self.inner.name, "re-entrant tick ignored");
                return;
            }

            state.last_seen = Some(frame.now);
            state.stamp_deadlines(frame.now);

            if let Some(expired) = state.take_expired(frame.now) {
                drop(state);
                self.on_timeout(expired);
                return;
            }

            let Some(mut entry) = state.current.take().or_else(|| state.lanes.pop_head()) else {
                return;
            };
            entry.arm(frame.now, frame.index);

            if !entry.is_ready(frame.now, frame.index) {
                state.current = Some(entry);
                return;
            }

            state.in_flight = Some(state.generation);
            state.in_flight_name = Some(entry.name.clone());
            (entry, state.generation)
        };

        let verdict = {
            let mut ctx = StepContext {
                frame,
                scheduler: self,
                name: &entry.name,
                attempt: entry.attempts,
            };
            match catch_unwind(AssertUnwindSafe(|| entry.step.run(&mut ctx))) {
                Ok(Ok(Outcome::Done)) => Verdict::Completed,
                Ok(Ok(Outcome::Retry(delay))) => Verdict::Retry(delay.unwrap_or(entry.retry_delay)),
                Ok(Ok(Outcome::Aborted(reason))) => Verdict::Failed(FailureReason::Aborted(reason)),
                Ok(Err(fault)) => Verdict::Failed(FailureReason::Fault(fault.to_string())),
                Err(payload) => Verdict::Failed(FailureReason::Panicked(panic_message(payload.as_ref()))),
            }
        };

        let mut state = self.inner.state.lock();
        state.in_flight = None;
        state.in_flight_name = None;

        if state.generation != generation {
            trace!(
                target: "task_runtime::scheduler",
                scheduler = %self.inner.name,
                step = %entry.name,
                "step returned after abort, discarded"
            );
            return;
        }

        match verdict {
            Verdict::Completed => {
                let drained = state.queued() == 0;
                let claims = if drained {
                    std::mem::take(&mut state.claims)
                } else {
                    Vec::new()
                };
                drop(state);

                trace!(
                    target: "task_runtime::scheduler",
                    scheduler = %self.inner.name,
                    step = %entry.name,
                    attempts = entry.attempts + 1,
                    "step done"
                );
                self.publish(SchedulerEvent::StepCompleted {
                    scheduler: self.inner.name.clone(),
                    step: entry.name,
                    at: frame.now,
                });
                if drained {
                    self.on_drained(claims);
                }
            }
            Verdict::Retry(delay) => {
                entry.attempts = entry.attempts.saturating_add(1);
                entry.ready_at = Some(frame.now + delay);
                entry.ready_frame = None;
                state.current = Some(entry);
            }
            Verdict::Failed(reason) => {
                drop(state);
                self.fail(entry.name, reason);
            }
        }
    }

    fn on_timeout(&self, entry: Entry) {
        let limit = entry.time_limit;
        if entry.abort_on_timeout {
            self.fail(entry.name, FailureReason::TimedOut(limit));
            return;
        }

        warn!(
            target: "task_runtime::scheduler",
            scheduler = %self.inner.name,
            step = %entry.name,
            limit_ms = duration_millis(limit),
            "step timed out, skipping"
        );
        self.publish(SchedulerEvent::StepSkipped {
            scheduler: self.inner.name.clone(),
            step: entry.name,
            reason: FailureReason::TimedOut(limit),
        });
        let claims = {
            let mut state = self.inner.state.lock();
            if state.queued() == 0 {
                Some(std::mem::take(&mut state.claims))
            } else {
                None
            }
        };
        if let Some(claims) = claims {
            self.on_drained(claims);
        }
    }

    fn fail(&self, step: String, reason: FailureReason) {
        let (failure, claims) = {
            let mut state = self.inner.state.lock();
            let discarded = state.clear();
            let failure = QueueFailure {
                step,
                reason,
                discarded,
            };
            state.last_failure = Some(failure.clone());
            (failure, std::mem::take(&mut state.claims))
        };

        warn!(
            target: "task_runtime::scheduler",
            scheduler = %self.inner.name,
            step = %failure.step,
            reason = ?failure.reason,
            discarded = failure.discarded,
            "queue failed, cleared"
        );
        self.publish(SchedulerEvent::Failed {
            scheduler: self.inner.name.clone(),
            failure,
        });
        self.release_claims(claims);
    }

    fn on_drained(&self, claims: Vec<(Arc<ConflictArbiter>, String)>) {
        debug!(target: "task_runtime::scheduler", scheduler = %self.inner.name, "drained");
        self.publish(SchedulerEvent::Drained {
            scheduler: self.inner.name.clone(),
        });
        self.release_claims(claims);
    }

    fn release_claims(&self, claims: Vec<(Arc<ConflictArbiter>, String)>) {
        for (arbiter, key) in claims {
            arbiter.release(&key, &self.inner.name);
        }
    }

    fn publish(&self, event: SchedulerEvent) {
        if let Some(events) = &self.inner.events {
            events.publish(event);
        }
    }
}

impl std::fmt::Debug for StepScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StepScheduler")
            .field("name", &self.inner.name)
            .field("queued", &state.queued())
            .field("generation", &state.generation)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
