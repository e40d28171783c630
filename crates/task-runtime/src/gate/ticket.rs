use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use super::bridge::IssueRefusal;

/// How the gate resolved one intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DispatchOutcome {
    /// The host accepted the action.
    Issued,
    /// An interceptor cancelled the intent.
    Prevented { by: String },
    /// A higher-priority (or earlier equal-priority) intent with the same
    /// dedup key won this frame.
    Dropped { winner_priority: u8 },
    /// The dedup key was issued too recently.
    Throttled { remaining: Duration },
    /// The host refused. The throttle slot is not consumed.
    IssueFailed(IssueRefusal),
    /// The gate discarded the intent before resolving it.
    Cancelled,
}

impl DispatchOutcome {
    /// `true` only when the action reached the host and was accepted.
    #[inline]
    pub fn is_issued(&self) -> bool {
        matches!(self, DispatchOutcome::Issued)
    }
}

/// Deferred handle on a dispatch, resolved at the next gate flush.
#[derive(Debug, Clone, Default)]
pub struct DispatchTicket {
    slot: Arc<Mutex<Option<DispatchOutcome>>>,
}

impl DispatchTicket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn resolve(&self, outcome: DispatchOutcome) {
        *self.slot.lock() = Some(outcome);
    }

    /// Outcome once the gate has flushed, `None` while pending.
    pub fn outcome(&self) -> Option<DispatchOutcome> {
        self.slot.lock().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.lock().is_some()
    }
}
