//! Simulated party state standing in for the game client.
//!
//! [`World`] is the host side of the runtime: it answers readiness queries
//! and applies issued actions to a small party, and it replays a scripted
//! damage timeline so the automation features have something to react to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use task_runtime::{ActionBridge, ActionIntent, ActionKind, Clock, IssueRefusal, Timestamp};
use tracing::{debug, info};

pub const CURE: u32 = 120;
pub const RAISE: u32 = 125;
pub const SWIFTCAST: u32 = 7561;

const FIRST_MEMBER_ID: u64 = 0x1000_0001;
const MAX_HP: u32 = 10_000;
const HIT_EVERY_FRAMES: u64 = 30;
const HIT_DAMAGE: u32 = 4_000;
const LETHAL_FRAME: u64 = 90;

fn cooldown(action_id: u32) -> Duration {
    match action_id {
        SWIFTCAST => Duration::from_secs(60),
        _ => Duration::from_millis(2_500),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: u64,
    pub name: String,
    pub hp: u32,
    pub max_hp: u32,
}

impl Member {
    pub fn is_dead(&self) -> bool {
        self.hp == 0
    }

    /// Remaining health in percent.
    pub fn hp_percent(&self) -> u32 {
        self.hp * 100 / self.max_hp
    }
}

/// One accepted action, as seen by the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cast {
    pub at: Timestamp,
    pub action_id: u32,
    pub target_id: u64,
}

#[derive(Default)]
struct WorldState {
    party: Vec<Member>,
    ready_at: HashMap<u32, Timestamp>,
    swiftcast_up: bool,
    casts: Vec<Cast>,
}

pub struct World {
    clock: Arc<dyn Clock>,
    state: Mutex<WorldState>,
}

impl World {
    pub fn new(clock: Arc<dyn Clock>, party_size: usize) -> Self {
        let party = (0..party_size.max(1))
            .map(|i| Member {
                id: FIRST_MEMBER_ID + i as u64,
                name: format!("member{}", i + 1),
                hp: MAX_HP,
                max_hp: MAX_HP,
            })
            .collect();
        Self {
            clock,
            state: Mutex::new(WorldState {
                party,
                ..WorldState::default()
            }),
        }
    }

    pub fn party(&self) -> Vec<Member> {
        self.state.lock().party.clone()
    }

    pub fn member(&self, id: u64) -> Option<Member> {
        self.state.lock().party.iter().find(|m| m.id == id).cloned()
    }

    pub fn casts(&self) -> Vec<Cast> {
        self.state.lock().casts.clone()
    }

    pub fn damage(&self, id: u64, amount: u32) {
        let mut state = self.state.lock();
        if let Some(member) = state.party.iter_mut().find(|m| m.id == id) {
            member.hp = member.hp.saturating_sub(amount);
            debug!(target: "host_sim::world", member = %member.name, hp = member.hp, "damage taken");
            if member.is_dead() {
                info!(target: "host_sim::world", member = %member.name, "member died");
            }
        }
    }

    /// Applies the scripted damage for `frame`: a rotating hit every
    /// few frames and one lethal hit on the third member.
    pub fn replay(&self, frame: u64) {
        let (rotating, lethal) = {
            let state = self.state.lock();
            let size = state.party.len() as u64;
            let rotating = (frame > 0 && frame % HIT_EVERY_FRAMES == 0)
                .then(|| state.party[((frame / HIT_EVERY_FRAMES) % size) as usize].id);
            let lethal = (frame == LETHAL_FRAME).then(|| state.party[2.min(size as usize - 1)].id);
            (rotating, lethal)
        };
        if let Some(id) = rotating {
            self.damage(id, HIT_DAMAGE);
        }
        if let Some(id) = lethal {
            self.damage(id, u32::MAX);
        }
    }

    fn target_mut<'a>(state: &'a mut WorldState, id: u64) -> Result<&'a mut Member, IssueRefusal> {
        state
            .party
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(IssueRefusal::InvalidTarget)
    }
}

impl ActionBridge for World {
    fn is_ready(&self, _kind: ActionKind, action_id: u32) -> bool {
        let now = self.clock.now();
        self.state
            .lock()
            .ready_at
            .get(&action_id)
            .is_none_or(|ready| now >= *ready)
    }

    fn issue(&self, intent: &ActionIntent) -> Result<(), IssueRefusal> {
        if intent.kind() != ActionKind::Ability {
            return Err(IssueRefusal::Other(format!("unsupported kind {}", intent.kind())));
        }
        if !self.is_ready(intent.kind(), intent.action_id) {
            return Err(IssueRefusal::NotReady);
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        match intent.action_id {
            SWIFTCAST => state.swiftcast_up = true,
            RAISE => {
                if !state.swiftcast_up {
                    return Err(IssueRefusal::InvalidState);
                }
                let target = Self::target_mut(&mut state, intent.target_id)?;
                if !target.is_dead() {
                    return Err(IssueRefusal::InvalidTarget);
                }
                target.hp = target.max_hp / 10;
                state.swiftcast_up = false;
            }
            CURE => {
                let target = Self::target_mut(&mut state, intent.target_id)?;
                if target.is_dead() {
                    return Err(IssueRefusal::InvalidTarget);
                }
                target.hp = (target.hp + target.max_hp * 3 / 10).min(target.max_hp);
            }
            other => return Err(IssueRefusal::Other(format!("unknown action {other}"))),
        }

        state.ready_at.insert(intent.action_id, now + cooldown(intent.action_id));
        state.casts.push(Cast {
            at: now,
            action_id: intent.action_id,
            target_id: intent.target_id,
        });
        Ok(())
    }
}
