//! Per-frame notification source.
//!
//! The runtime never owns the game loop. Hosts implement [`TickSource`] over
//! whatever per-frame callback they have, or drive the in-crate
//! [`FrameTicker`] by calling [`FrameTicker::advance`] once per frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::clock::{Clock, Timestamp};

/// One elapsed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Monotonically increasing frame counter.
    pub index: u64,
    /// Clock reading taken when the frame fired.
    pub now: Timestamp,
}

/// Callback invoked once per frame.
pub type TickHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Identifies a subscription so it can be removed later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Host-supplied per-frame event source.
pub trait TickSource: Send + Sync {
    fn subscribe(&self, handler: TickHandler) -> SubscriptionId;

    /// Removes a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Frame source driven explicitly by the host loop.
///
/// Handlers run in subscription order. The handler list is snapshotted at
/// the start of each frame, so handlers may subscribe or unsubscribe from
/// inside a callback; the change applies from the next frame.
pub struct FrameTicker {
    clock: Arc<dyn Clock>,
    handlers: Mutex<Arc<[(SubscriptionId, TickHandler)]>>,
    next_id: AtomicU64,
    frame: AtomicU64,
}

impl FrameTicker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            handlers: Mutex::new(Arc::from(Vec::new())),
            next_id: AtomicU64::new(0),
            frame: AtomicU64::new(0),
        }
    }

    /// Fires one frame and returns it.
    pub fn advance(&self) -> Frame {
        let frame = Frame {
            index: self.frame.fetch_add(1, Ordering::Relaxed) + 1,
            now: self.clock.now(),
        };
        let snapshot = Arc::clone(&*self.handlers.lock());
        for (_, handler) in snapshot.iter() {
            handler(&frame);
        }
        frame
    }

    /// Index of the last frame fired, zero before the first.
    pub fn frame_index(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl TickSource for FrameTicker {
    fn subscribe(&self, handler: TickHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.lock();
        let mut next: Vec<_> = handlers.iter().cloned().collect();
        next.push((id, handler));
        *handlers = next.into();
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut handlers = self.handlers.lock();
        if handlers.iter().any(|(sid, _)| *sid == id) {
            let next: Vec<_> = handlers
                .iter()
                .filter(|(sid, _)| *sid != id)
                .cloned()
                .collect();
            *handlers = next.into();
        }
    }
}
