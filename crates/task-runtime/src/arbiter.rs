//! Keyed mutual exclusion between features.
//!
//! Two unrelated features must not drive the same multi-step sequence at the
//! same time (for example two automations both operating one native window).
//! A feature claims a key before it enqueues work and releases it when the
//! sequence ends or the feature is disabled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::events::{ArbiterEvent, EventBus};
use crate::throttle::Throttler;

/// Result of [`ConflictArbiter::try_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The key was free and now belongs to the caller.
    Acquired,
    /// The caller already held the key.
    AlreadyHeld,
    /// Another owner holds the key. The caller must not start its sequence.
    Interrupted { holder: String },
}

impl Claim {
    /// `true` when the caller must abandon and return early.
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Claim::Interrupted { .. })
    }

    /// `true` when the caller owns the key after the call.
    #[inline]
    pub fn is_held(&self) -> bool {
        !self.is_interrupted()
    }
}

pub struct ConflictArbiter {
    tokens: Mutex<HashMap<String, String>>,
    events: Option<EventBus>,
    contention_log: Throttler,
    contention_log_interval: Duration,
}

impl ConflictArbiter {
    pub const DEFAULT_CONTENTION_LOG_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            events: None,
            contention_log: Throttler::new(clock),
            contention_log_interval: Self::DEFAULT_CONTENTION_LOG_INTERVAL,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Limits how often contention on a single key is logged.
    pub fn with_contention_log_interval(mut self, interval: Duration) -> Self {
        self.contention_log_interval = interval;
        self
    }

    /// Claims `key` for `owner`.
    ///
    /// Succeeds when the key is free or already held by `owner`; reports
    /// [`Claim::Interrupted`] when a different owner holds it.
    pub fn try_claim(&self, key: &str, owner: &str) -> Claim {
        let claim = {
            let mut tokens = self.tokens.lock();
            match tokens.get(key) {
                Some(holder) if holder == owner => Claim::AlreadyHeld,
                Some(holder) => Claim::Interrupted {
                    holder: holder.clone(),
                },
                None => {
                    tokens.insert(key.to_owned(), owner.to_owned());
                    Claim::Acquired
                }
            }
        };

        match &claim {
            Claim::Acquired => {
                trace!(target: "task_runtime::arbiter", key, owner, "claimed");
                self.publish(ArbiterEvent::Claimed {
                    key: key.to_owned(),
                    owner: owner.to_owned(),
                });
            }
            Claim::AlreadyHeld => {}
            Claim::Interrupted { holder } => {
                let log_key = format!("{key}\u{0}{owner}");
                if self
                    .contention_log
                    .throttle(&log_key, self.contention_log_interval)
                {
                    debug!(
                        target: "task_runtime::arbiter",
                        key,
                        owner,
                        holder = holder.as_str(),
                        "claim interrupted by current holder"
                    );
                }
                self.publish(ArbiterEvent::Interrupted {
                    key: key.to_owned(),
                    owner: owner.to_owned(),
                    holder: holder.clone(),
                });
            }
        }

        claim
    }

    /// Releases `key` if `owner` holds it. Returns whether anything changed.
    pub fn release(&self, key: &str, owner: &str) -> bool {
        let released = {
            let mut tokens = self.tokens.lock();
            match tokens.get(key) {
                Some(holder) if holder == owner => {
                    tokens.remove(key);
                    true
                }
                _ => false,
            }
        };

        if released {
            trace!(target: "task_runtime::arbiter", key, owner, "released");
            self.publish(ArbiterEvent::Released {
                key: key.to_owned(),
                owner: owner.to_owned(),
            });
        }
        released
    }

    /// Releases every key held by `owner`, e.g. when its feature is disabled.
    pub fn release_all(&self, owner: &str) -> usize {
        let released: Vec<String> = {
            let mut tokens = self.tokens.lock();
            let keys: Vec<String> = tokens
                .iter()
                .filter(|(_, holder)| holder.as_str() == owner)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                tokens.remove(key);
            }
            keys
        };

        for key in &released {
            self.publish(ArbiterEvent::Released {
                key: key.clone(),
                owner: owner.to_owned(),
            });
        }
        released.len()
    }

    /// Current holder of `key`, if any.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.tokens.lock().get(key).cloned()
    }

    fn publish(&self, event: ArbiterEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

impl std::fmt::Debug for ConflictArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictArbiter")
            .field("tokens", &*self.tokens.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn arbiter() -> ConflictArbiter {
        ConflictArbiter::new(Arc::new(ManualClock::new()))
    }

    #[test]
    fn competing_owner_is_interrupted() {
        let arbiter = arbiter();

        assert_eq!(arbiter.try_claim("window", "auto_raise"), Claim::Acquired);
        let second = arbiter.try_claim("window", "auto_heal");
        assert!(second.is_interrupted());
        assert_eq!(
            second,
            Claim::Interrupted {
                holder: "auto_raise".into()
            }
        );
    }

    #[test]
    fn reclaim_by_holder_is_not_interrupted() {
        let arbiter = arbiter();

        assert!(arbiter.try_claim("window", "a").is_held());
        assert_eq!(arbiter.try_claim("window", "a"), Claim::AlreadyHeld);
    }

    #[test]
    fn release_hands_the_key_to_the_next_claimant() {
        let arbiter = arbiter();

        arbiter.try_claim("window", "a");
        assert!(arbiter.release("window", "a"));
        assert_eq!(arbiter.try_claim("window", "b"), Claim::Acquired);
        assert_eq!(arbiter.holder("window").as_deref(), Some("b"));
    }

    #[test]
    fn release_by_non_holder_is_a_no_op() {
        let arbiter = arbiter();

        arbiter.try_claim("window", "a");
        assert!(!arbiter.release("window", "b"));
        assert!(!arbiter.release("other", "a"));
        assert_eq!(arbiter.holder("window").as_deref(), Some("a"));
    }

    #[test]
    fn release_all_drops_only_the_owners_keys() {
        let arbiter = arbiter();

        arbiter.try_claim("one", "a");
        arbiter.try_claim("two", "a");
        arbiter.try_claim("three", "b");

        assert_eq!(arbiter.release_all("a"), 2);
        assert_eq!(arbiter.holder("one"), None);
        assert_eq!(arbiter.holder("three").as_deref(), Some("b"));
    }

    #[test]
    fn contention_is_published() {
        let bus = EventBus::with_capacity(8);
        let mut rx = bus.subscribe(crate::events::Topic::Arbiter);
        let arbiter = arbiter().with_events(bus);

        arbiter.try_claim("k", "a");
        arbiter.try_claim("k", "b");

        assert!(matches!(
            rx.try_recv(),
            Ok(crate::events::Event::Arbiter(ArbiterEvent::Claimed { .. }))
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(crate::events::Event::Arbiter(ArbiterEvent::Interrupted { .. }))
        ));
    }
}
