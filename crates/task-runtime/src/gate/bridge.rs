//! Boundary to the host's native action calls.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::intent::{ActionIntent, ActionKind};

/// Why the host refused to issue an action.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum IssueRefusal {
    #[error("action is not ready")]
    NotReady,

    #[error("target out of range")]
    OutOfRange,

    #[error("invalid target")]
    InvalidTarget,

    #[error("actor state does not allow the action")]
    InvalidState,

    #[error("{0}")]
    Other(String),
}

/// Native operations the gate relies on. Implemented by the host
/// integration layer; nothing in this crate touches game memory.
pub trait ActionBridge: Send + Sync {
    /// Whether the action is off cooldown and usable right now.
    fn is_ready(&self, kind: ActionKind, action_id: u32) -> bool;

    /// Issues the action immediately.
    fn issue(&self, intent: &ActionIntent) -> Result<(), IssueRefusal>;
}
