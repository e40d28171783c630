//! Keyed cooldown gate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, Timestamp};

/// Answers "has at least `interval` elapsed since `key` was last allowed?".
///
/// Entries are created lazily on first use and are never expired, so memory
/// is bounded by the number of distinct keys rather than by time.
pub struct Throttler {
    clock: Arc<dyn Clock>,
    last_allowed: Mutex<HashMap<String, Timestamp>>,
}

impl Throttler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_allowed: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` and records the current time if `key` has never been
    /// allowed or its interval has elapsed. Returns `false` without touching
    /// state otherwise.
    pub fn throttle(&self, key: &str, interval: Duration) -> bool {
        let now = self.clock.now();
        let mut entries = self.last_allowed.lock();
        match entries.get_mut(key) {
            Some(last) if now.saturating_since(*last) < interval => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                entries.insert(key.to_owned(), now);
                true
            }
        }
    }

    /// Same test as [`throttle`](Self::throttle) but never records.
    pub fn check(&self, key: &str, interval: Duration) -> bool {
        self.remaining(key, interval).is_zero()
    }

    /// Records `key` as allowed now, regardless of its previous state.
    pub fn mark(&self, key: &str) {
        let now = self.clock.now();
        self.last_allowed.lock().insert(key.to_owned(), now);
    }

    /// Time left before `key` would be allowed again.
    pub fn remaining(&self, key: &str, interval: Duration) -> Duration {
        let now = self.clock.now();
        self.last_allowed
            .lock()
            .get(key)
            .map(|last| interval.saturating_sub(now.saturating_since(*last)))
            .unwrap_or(Duration::ZERO)
    }

    /// Forgets `key`. Returns whether an entry existed.
    pub fn reset(&self, key: &str) -> bool {
        self.last_allowed.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.last_allowed.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.last_allowed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

impl std::fmt::Debug for Throttler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("keys", &self.len())
            .finish()
    }
}
