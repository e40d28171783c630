//! Action intents submitted to the dispatch gate.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::AsRefStr;

/// Category of in-game action, mirrored from the host's action tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    /// Job or role ability.
    Ability,
    /// Inventory item use.
    Item,
    /// General command (sprint, dismount, ...).
    General,
    /// Mount summon.
    Mount,
    /// Host-specific category not covered above.
    Other(u8),
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Other(raw) => write!(f, "other({raw})"),
            kind => f.write_str(kind.as_ref()),
        }
    }
}

/// World-space position for ground-targeted actions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Location {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Request to issue one action.
///
/// `action_id`, `target_id` and `location` are public because interceptors
/// may rewrite them. Kind, param, priority and dedup key are fixed at
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionIntent {
    pub action_id: u32,
    pub target_id: u64,
    pub location: Option<Location>,
    kind: ActionKind,
    param: u32,
    priority: u8,
    dedup_key: String,
    throttle: Option<Duration>,
    source: Option<String>,
}

impl ActionIntent {
    /// Host convention for "no explicit target".
    pub const NO_TARGET: u64 = 0xE000_0000;

    pub const DEFAULT_PRIORITY: u8 = 1;

    pub fn new(kind: ActionKind, action_id: u32, target_id: u64) -> Self {
        Self {
            action_id,
            target_id,
            location: None,
            kind,
            param: 0,
            priority: Self::DEFAULT_PRIORITY,
            dedup_key: format!("{kind}:{action_id}"),
            throttle: None,
            source: None,
        }
    }

    pub fn ability(action_id: u32, target_id: u64) -> Self {
        Self::new(ActionKind::Ability, action_id, target_id)
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_param(mut self, param: u32) -> Self {
        self.param = param;
        self
    }

    /// Higher wins when intents share a dedup key within one frame.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the identity used for deduplication and throttling.
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = key.into();
        self
    }

    /// Overrides the gate's default throttle window for this intent.
    pub fn with_throttle(mut self, interval: Duration) -> Self {
        self.throttle = Some(interval);
        self
    }

    /// Labels the submitting feature for diagnostics.
    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn param(&self) -> u32 {
        self.param
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn dedup_key(&self) -> &str {
        &self.dedup_key
    }

    pub fn throttle(&self) -> Option<Duration> {
        self.throttle
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_defaults_to_kind_and_action_id() {
        let intent = ActionIntent::ability(7561, ActionIntent::NO_TARGET);
        assert_eq!(intent.dedup_key(), "ability:7561");

        let item = ActionIntent::new(ActionKind::Item, 7561, 1);
        assert_ne!(item.dedup_key(), intent.dedup_key());
    }

    #[test]
    fn rewriting_action_id_keeps_dedup_key() {
        let mut intent = ActionIntent::ability(125, 42).with_dedup_key("Raise");
        intent.action_id = 173;
        assert_eq!(intent.dedup_key(), "Raise");
    }
}
