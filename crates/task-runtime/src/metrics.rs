//! Dispatch gate counters.
//!
//! Tracks how intents were resolved so hosts can surface anti-spam and
//! contention behaviour in debug overlays.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::gate::DispatchOutcome;

/// Outcome counters kept by the dispatch gate.
///
/// Uses relaxed atomics; values are diagnostic snapshots, not a ledger.
#[derive(Debug, Default)]
pub struct GateMetrics {
    issued: AtomicU64,
    prevented: AtomicU64,
    dropped: AtomicU64,
    throttled: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Point-in-time copy of [`GateMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateMetricsSnapshot {
    pub issued: u64,
    pub prevented: u64,
    pub dropped: u64,
    pub throttled: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl GateMetricsSnapshot {
    /// Intents resolved in any way.
    pub fn total(&self) -> u64 {
        self.issued + self.prevented + self.dropped + self.throttled + self.failed + self.cancelled
    }
}

impl GateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Issued => &self.issued,
            DispatchOutcome::Prevented { .. } => &self.prevented,
            DispatchOutcome::Dropped { .. } => &self.dropped,
            DispatchOutcome::Throttled { .. } => &self.throttled,
            DispatchOutcome::IssueFailed(_) => &self.failed,
            DispatchOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GateMetricsSnapshot {
        GateMetricsSnapshot {
            issued: self.issued.load(Ordering::Relaxed),
            prevented: self.prevented.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}
