//! Shared action dispatch gate.
//!
//! Every feature funnels its action intents through one
//! [`ActionDispatchGate`]. Intents submitted during a frame are resolved
//! together at the next flush:
//!
//! 1. the interceptor chain runs over each intent in submission order; the
//!    first interceptor that prevents stops the chain,
//! 2. surviving intents that share a dedup key are arbitrated by priority
//!    (strictly greater wins, ties go to the first submitted),
//! 3. each winner is checked against the throttle window for its key,
//! 4. the host bridge issues the action. Only an accepted issue consumes
//!    the throttle slot.
//!
//! Interceptors always run before the bridge is called.

mod bridge;
mod intent;
mod interceptor;
mod ticket;

pub use bridge::{ActionBridge, IssueRefusal};
pub use intent::{ActionIntent, ActionKind, Location};
pub use interceptor::{Interception, Interceptor, InterceptorId};
pub use ticket::{DispatchOutcome, DispatchTicket};

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::events::{DispatchEvent, EventBus};
use crate::metrics::{GateMetrics, GateMetricsSnapshot};
use crate::throttle::Throttler;
use crate::tick::{Frame, SubscriptionId, TickSource};

use interceptor::{InterceptorChain, run_chain};

struct Pending {
    intent: ActionIntent,
    ticket: DispatchTicket,
}

pub struct ActionDispatchGate {
    bridge: Arc<dyn ActionBridge>,
    throttler: Arc<Throttler>,
    interceptors: InterceptorChain,
    pending: Mutex<Vec<Pending>>,
    default_interval: Duration,
    events: Option<EventBus>,
    metrics: GateMetrics,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl ActionDispatchGate {
    pub fn new(
        bridge: Arc<dyn ActionBridge>,
        throttler: Arc<Throttler>,
        default_interval: Duration,
    ) -> Self {
        Self {
            bridge,
            throttler,
            interceptors: InterceptorChain::new(),
            pending: Mutex::new(Vec::new()),
            default_interval,
            events: None,
            metrics: GateMetrics::new(),
            subscription: Mutex::new(None),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Appends an interceptor to the end of the chain.
    pub fn register_interceptor(&self, interceptor: Arc<dyn Interceptor>) -> InterceptorId {
        let id = self.interceptors.register(interceptor);
        debug!(target: "task_runtime::gate", ?id, chain_len = self.interceptors.len(), "interceptor registered");
        id
    }

    /// Registers a closure as a named interceptor.
    pub fn register_fn<F>(&self, name: &'static str, f: F) -> InterceptorId
    where
        F: Fn(&mut ActionIntent) -> Interception + Send + Sync + 'static,
    {
        let id = self.interceptors.register_fn(name, f);
        debug!(target: "task_runtime::gate", name, ?id, "interceptor registered");
        id
    }

    /// Removes an interceptor. Returns whether it was registered.
    pub fn unregister(&self, id: InterceptorId) -> bool {
        self.interceptors.unregister(id)
    }

    /// Interceptor names in execution order.
    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.interceptors.names()
    }

    /// Queues `intent` for resolution at the next flush.
    pub fn dispatch(&self, intent: ActionIntent) -> DispatchTicket {
        let ticket = DispatchTicket::new();
        trace!(
            target: "task_runtime::gate",
            key = intent.dedup_key(),
            action_id = intent.action_id,
            priority = intent.priority(),
            "intent queued"
        );
        self.pending.lock().push(Pending {
            intent,
            ticket: ticket.clone(),
        });
        ticket
    }

    /// Resolves a single intent immediately, bypassing frame batching.
    pub fn dispatch_now(&self, mut intent: ActionIntent) -> DispatchOutcome {
        let snapshot = self.interceptors.snapshot();
        let outcome = match run_chain(&snapshot, &mut intent) {
            Some(by) => DispatchOutcome::Prevented { by: by.to_owned() },
            None => self.issue(&intent),
        };
        self.record(&intent, &outcome);
        outcome
    }

    /// Pass-through readiness query to the host.
    pub fn is_ready(&self, kind: ActionKind, action_id: u32) -> bool {
        self.bridge.is_ready(kind, action_id)
    }

    /// Number of intents waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Resolves every intent queued so far. Intents dispatched while the
    /// flush runs (from interceptors or the bridge) wait for the next one.
    pub fn flush(&self) {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return;
        }

        let snapshot = self.interceptors.snapshot();
        let mut survivors = Vec::with_capacity(batch.len());
        for mut pending in batch {
            match run_chain(&snapshot, &mut pending.intent) {
                Some(by) => self.resolve(
                    pending,
                    DispatchOutcome::Prevented { by: by.to_owned() },
                ),
                None => survivors.push(pending),
            }
        }

        let winner_priority = arbitrate(&survivors);
        for (pending, lost_to) in survivors.into_iter().zip(winner_priority) {
            let outcome = match lost_to {
                Some(winner_priority) => DispatchOutcome::Dropped { winner_priority },
                None => self.issue(&pending.intent),
            };
            self.resolve(pending, outcome);
        }
    }

    /// Resolves every queued intent as [`DispatchOutcome::Cancelled`].
    pub fn cancel_pending(&self) -> usize {
        let batch = std::mem::take(&mut *self.pending.lock());
        let count = batch.len();
        for pending in batch {
            self.resolve(pending, DispatchOutcome::Cancelled);
        }
        count
    }

    /// Subscribes the gate's flush to `source`.
    pub fn attach(self: &Arc<Self>, source: &dyn TickSource) -> SubscriptionId {
        let weak: Weak<Self> = Arc::downgrade(self);
        let id = source.subscribe(Arc::new(move |_frame: &Frame| {
            if let Some(gate) = weak.upgrade() {
                gate.flush();
            }
        }));
        *self.subscription.lock() = Some(id);
        id
    }

    /// Unsubscribes from `source` and cancels pending intents.
    pub fn detach(&self, source: &dyn TickSource) {
        if let Some(id) = self.subscription.lock().take() {
            source.unsubscribe(id);
        }
        self.cancel_pending();
    }

    pub fn metrics(&self) -> GateMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    fn issue(&self, intent: &ActionIntent) -> DispatchOutcome {
        let key = throttle_key(intent.dedup_key());
        let interval = intent.throttle().unwrap_or(self.default_interval);
        let remaining = self.throttler.remaining(&key, interval);
        if !remaining.is_zero() {
            return DispatchOutcome::Throttled { remaining };
        }

        match self.bridge.issue(intent) {
            Ok(()) => {
                self.throttler.mark(&key);
                DispatchOutcome::Issued
            }
            Err(refusal) => DispatchOutcome::IssueFailed(refusal),
        }
    }

    fn resolve(&self, pending: Pending, outcome: DispatchOutcome) {
        self.record(&pending.intent, &outcome);
        pending.ticket.resolve(outcome);
    }

    fn record(&self, intent: &ActionIntent, outcome: &DispatchOutcome) {
        self.metrics.record(outcome);

        if outcome.is_issued() {
            debug!(
                target: "task_runtime::gate",
                key = intent.dedup_key(),
                kind = %intent.kind(),
                action_id = intent.action_id,
                target_id = intent.target_id,
                source = intent.source().unwrap_or("-"),
                "action issued"
            );
        } else {
            trace!(
                target: "task_runtime::gate",
                key = intent.dedup_key(),
                action_id = intent.action_id,
                outcome = outcome.as_ref(),
                "intent not issued"
            );
        }

        if let Some(events) = &self.events {
            events.publish(DispatchEvent {
                dedup_key: intent.dedup_key().to_owned(),
                action_id: intent.action_id,
                target_id: intent.target_id,
                priority: intent.priority(),
                outcome: outcome.clone(),
                at: self.throttler.now(),
            });
        }
    }
}

impl std::fmt::Debug for ActionDispatchGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatchGate")
            .field("interceptors", &self.interceptors.names())
            .field("pending", &self.pending_len())
            .field("default_interval", &self.default_interval)
            .finish()
    }
}

/// For each pending intent, `None` if it wins its dedup key, otherwise the
/// priority of the winner.
fn arbitrate(batch: &[Pending]) -> Vec<Option<u8>> {
    let mut best: HashMap<&str, usize> = HashMap::new();
    for (idx, pending) in batch.iter().enumerate() {
        let key = pending.intent.dedup_key();
        match best.get(key) {
            Some(&current) if batch[current].intent.priority() >= pending.intent.priority() => {}
            _ => {
                best.insert(key, idx);
            }
        }
    }

    batch
        .iter()
        .enumerate()
        .map(|(idx, pending)| {
            let winner = best[pending.intent.dedup_key()];
            (winner != idx).then(|| batch[winner].intent.priority())
        })
        .collect()
}

fn throttle_key(dedup_key: &str) -> String {
    format!("dispatch:{dedup_key}")
}
