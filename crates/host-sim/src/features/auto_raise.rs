use std::sync::Arc;
use std::time::Duration;

use task_runtime::{
    ActionDispatchGate, ActionIntent, ConflictArbiter, GateContext, Outcome, StepOptions,
    StepScheduler, Throttler,
};
use tracing::{debug, info};

use super::{DispatchStep, Feature, PARTY_TARGET};
use crate::world::{RAISE, SWIFTCAST, World};

const NAME: &str = "auto_raise";
const SCAN_INTERVAL: Duration = Duration::from_millis(250);
/// Animation lock after Swiftcast before Raise can be queued.
const ANIMATION_LOCK: Duration = Duration::from_millis(100);
const RAISE_PRIORITY: u8 = 10;

/// Revives the first dead party member with Swiftcast followed by Raise.
pub struct AutoRaise {
    world: Arc<World>,
    gate: Arc<ActionDispatchGate>,
    arbiter: Arc<ConflictArbiter>,
    throttler: Arc<Throttler>,
    scheduler: StepScheduler,
}

impl AutoRaise {
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

impl Feature for AutoRaise {
    fn name(&self) -> &'static str {
        NAME
    }

    fn poll(&mut self) {
        if self.scheduler.is_busy() || !self.throttler.throttle("auto_raise:scan", SCAN_INTERVAL) {
            return;
        }
        let Some(target) = self.world.party().into_iter().find(|m| m.is_dead()) else {
            return;
        };
        if self.scheduler.bind_claim(&self.arbiter, PARTY_TARGET).is_interrupted() {
            debug!(target: "host_sim::auto_raise", member = %target.name, "party target busy, waiting");
            return;
        }

        info!(target: "host_sim::auto_raise", member = %target.name, "raising");
        self.scheduler.enqueue_step(
            "swiftcast",
            StepOptions::new(),
            DispatchStep::new(
                Arc::clone(&self.gate),
                ActionIntent::ability(SWIFTCAST, ActionIntent::NO_TARGET)
                    .with_priority(RAISE_PRIORITY)
                    .from_source(NAME),
            ),
        );
        self.scheduler.delay_next(ANIMATION_LOCK);
        self.scheduler.enqueue_step(
            "raise",
            StepOptions::new(),
            DispatchStep::new(
                Arc::clone(&self.gate),
                ActionIntent::ability(RAISE, target.id)
                    .with_dedup_key("Raise")
                    .with_priority(RAISE_PRIORITY)
                    .from_source(NAME),
            ),
        );

        let world = Arc::clone(&self.world);
        let target_id = target.id;
        self.scheduler.enqueue_with(
            "confirm_alive",
            StepOptions::new().time_limit(Duration::from_secs(2)),
            move |_| {
                Ok(Outcome::done_if(
                    world.member(target_id).is_some_and(|m| !m.is_dead()),
                ))
            },
        );
    }

    fn scheduler(&self) -> &StepScheduler {
        &self.scheduler
    }
}
