//! Shared state constructed once when the host attaches.
//!
//! [`GateContext`] replaces process-wide statics: it owns the clock, the
//! shared throttler, the conflict arbiter, the dispatch gate and the event
//! bus, and hands out schedulers wired to them. Its lifetime is the host's
//! attach/detach window.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::arbiter::ConflictArbiter;
use crate::clock::{Clock, MonotonicClock, duration_millis};
use crate::config::RuntimeConfig;
use crate::error::{CoreError, Result};
use crate::events::{Event, EventBus, Topic};
use crate::gate::{ActionBridge, ActionDispatchGate};
use crate::scheduler::{SchedulerDefaults, StepScheduler};
use crate::throttle::Throttler;
use crate::tick::TickSource;

pub struct GateContext {
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    throttler: Arc<Throttler>,
    arbiter: Arc<ConflictArbiter>,
    gate: Arc<ActionDispatchGate>,
    events: EventBus,
}

impl GateContext {
    /// Create a new context builder
    pub fn builder() -> GateContextBuilder {
        GateContextBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Throttler shared by all features for their own anti-spam keys.
    pub fn throttler(&self) -> &Arc<Throttler> {
        &self.throttler
    }

    pub fn arbiter(&self) -> &Arc<ConflictArbiter> {
        &self.arbiter
    }

    pub fn gate(&self) -> &Arc<ActionDispatchGate> {
        &self.gate
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.events.subscribe(topic)
    }

    /// Creates a scheduler using the configured defaults, event bus and
    /// clock. Step deadlines are stamped from the clock at enqueue.
    ///
    /// The scheduler is not attached to any tick source yet.
    pub fn scheduler(&self, name: impl Into<String>) -> StepScheduler {
        StepScheduler::with_defaults(
            name,
            SchedulerDefaults::from(&self.config),
            Some(self.events.clone()),
            Some(Arc::clone(&self.clock)),
        )
    }

    /// Subscribes the gate flush to `source`.
    ///
    /// Attach the context before feature schedulers so that intents queued
    /// during frame N are resolved at the start of frame N+1, before any
    /// step polls its ticket.
    pub fn attach(&self, source: &dyn TickSource) {
        self.gate.attach(source);
    }

    /// Unsubscribes the gate and cancels intents still pending.
    pub fn detach(&self, source: &dyn TickSource) {
        self.gate.detach(source);
    }
}

impl std::fmt::Debug for GateContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateContext")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .field("arbiter", &self.arbiter)
            .finish()
    }
}

/// Builder for [`GateContext`].
pub struct GateContextBuilder {
    config: RuntimeConfig,
    clock: Option<Arc<dyn Clock>>,
    bridge: Option<Arc<dyn ActionBridge>>,
}

impl GateContextBuilder {
    fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            clock: None,
            bridge: None,
        }
    }

    /// Override runtime configuration
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the monotonic clock. Defaults to [`MonotonicClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the required host bridge
    pub fn bridge(mut self, bridge: Arc<dyn ActionBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn build(self) -> Result<GateContext> {
        self.config.validate()?;
        let bridge = self.bridge.ok_or(CoreError::MissingBridge)?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()) as Arc<dyn Clock>);

        let events = EventBus::with_capacity(self.config.event_buffer_size);
        let throttler = Arc::new(Throttler::new(Arc::clone(&clock)));
        let arbiter = Arc::new(
            ConflictArbiter::new(Arc::clone(&clock))
                .with_events(events.clone())
                .with_contention_log_interval(self.config.contention_log_interval),
        );
        let gate = Arc::new(
            ActionDispatchGate::new(
                bridge,
                Arc::clone(&throttler),
                self.config.dispatch_interval,
            )
            .with_events(events.clone()),
        );

        info!(
            target: "task_runtime::context",
            time_limit_ms = duration_millis(self.config.default_time_limit),
            dispatch_interval_ms = duration_millis(self.config.dispatch_interval),
            "gate context ready"
        );

        Ok(GateContext {
            config: self.config,
            clock,
            throttler,
            arbiter,
            gate,
            events,
        })
    }
}
