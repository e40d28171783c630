use std::sync::Arc;
use std::time::Duration;

use task_runtime::{
    ActionDispatchGate, ActionIntent, ConflictArbiter, GateContext, Outcome, StepOptions,
    StepScheduler, Throttler,
};
use tracing::debug;

use super::{DispatchStep, Feature, PARTY_TARGET};
use crate::world::{CURE, World};

const NAME: &str = "auto_heal";
const SCAN_INTERVAL: Duration = Duration::from_millis(200);
const HEAL_BELOW_PERCENT: u32 = 50;

/// Cures the most injured living member once they drop below half health.
pub struct AutoHeal {
    world: Arc<World>,
    gate: Arc<ActionDispatchGate>,
    arbiter: Arc<ConflictArbiter>,
    throttler: Arc<Throttler>,
    scheduler: StepScheduler,
}

impl AutoHeal {
    pub fn new(ctx: &GateContext, world: Arc<World>) -> Self {
        Self {
            world,
            gate: Arc::clone(ctx.gate()),
            arbiter: Arc::clone(ctx.arbiter()),
            throttler: Arc::clone(ctx.throttler()),
            scheduler: ctx.scheduler(NAME),
        }
    }
}

impl Feature for AutoHeal {
    fn name(&self) -> &'static str {
        NAME
    }

    fn poll(&mut self) {
        if self.scheduler.is_busy() || !self.throttler.throttle("auto_heal:scan", SCAN_INTERVAL) {
            return;
        }
        let Some(target) = self
            .world
            .party()
            .into_iter()
            .filter(|m| !m.is_dead() && m.hp_percent() < HEAL_BELOW_PERCENT)
            .min_by_key(|m| m.hp)
        else {
            return;
        };
        if self.scheduler.bind_claim(&self.arbiter, PARTY_TARGET).is_interrupted() {
            return;
        }

        debug!(target: "host_sim::auto_heal", member = %target.name, hp = target.hp_percent(), "healing");
        let world = Arc::clone(&self.world);
        let target_id = target.id;
        self.scheduler.enqueue("select_target", move |_| {
            Ok(match world.member(target_id) {
                Some(member) if !member.is_dead() => Outcome::Done,
                _ => Outcome::abort("target died before the heal"),
            })
        });
        self.scheduler.delay_next_frames(1);
        self.scheduler.enqueue_step(
            "cure",
            StepOptions::new().time_limit(Duration::from_secs(5)),
            DispatchStep::new(
                Arc::clone(&self.gate),
                ActionIntent::ability(CURE, target_id)
                    .with_dedup_key("Cure")
                    .from_source(NAME),
            ),
        );
    }

    fn scheduler(&self) -> &StepScheduler {
        &self.scheduler
    }
}
