use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::gate::DispatchOutcome;
use crate::scheduler::{FailureReason, QueueFailure};

/// Step queue lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SchedulerEvent {
    /// A step returned `Done`.
    StepCompleted {
        scheduler: String,
        step: String,
        at: Timestamp,
    },
    /// A step timed out without failing the queue; the rest continues.
    StepSkipped {
        scheduler: String,
        step: String,
        reason: FailureReason,
    },
    /// The queue was cleared because a step aborted, faulted or timed out.
    Failed {
        scheduler: String,
        failure: QueueFailure,
    },
    /// The last step completed and the queue is idle again.
    Drained { scheduler: String },
    /// The owning feature called `abort` on a busy queue.
    Aborted { scheduler: String, discarded: usize },
}

/// One resolved action intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub dedup_key: String,
    pub action_id: u32,
    pub target_id: u64,
    pub priority: u8,
    pub outcome: DispatchOutcome,
    pub at: Timestamp,
}

/// Conflict token transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArbiterEvent {
    Claimed {
        key: String,
        owner: String,
    },
    Interrupted {
        key: String,
        owner: String,
        holder: String,
    },
    Released {
        key: String,
        owner: String,
    },
}
