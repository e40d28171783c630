//! Frame loop wiring the runtime to the simulated world.

use std::sync::Arc;

use anyhow::Result;
use task_runtime::{
    Event, FrameTicker, GateContext, GateMetricsSnapshot, Interception, ManualClock,
    QueueFailure, RuntimeConfig, SchedulerEvent, Topic, duration_millis,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};

use crate::config::SimConfig;
use crate::features::{AutoHeal, AutoRaise, Feature};
use crate::world::{Cast, Member, World};

pub struct Simulation {
    config: SimConfig,
    clock: Arc<ManualClock>,
    ticker: Arc<FrameTicker>,
    world: Arc<World>,
    ctx: GateContext,
    features: Vec<Box<dyn Feature>>,
    events: broadcast::Receiver<Event>,
    failures: Vec<(String, QueueFailure)>,
}

impl Simulation {
    pub fn new(runtime: RuntimeConfig, config: SimConfig) -> Result<Self> {
        let clock = Arc::new(ManualClock::new());
        let world = Arc::new(World::new(clock.clone(), config.party_size));
        let ctx = GateContext::builder()
            .config(runtime)
            .clock(clock.clone())
            .bridge(world.clone())
            .build()?;

        // The gate flushes before any feature ticks.
        let ticker = Arc::new(FrameTicker::new(clock.clone()));
        ctx.attach(ticker.as_ref());

        if let Some(blocked) = config.block_action {
            ctx.gate().register_fn("block_action", move |intent| {
                if intent.action_id == blocked {
                    Interception::Prevent
                } else {
                    Interception::Continue
                }
            });
        }

        let features: Vec<Box<dyn Feature>> = vec![
            Box::new(AutoRaise::new(&ctx, Arc::clone(&world))),
            Box::new(AutoHeal::new(&ctx, Arc::clone(&world))),
        ];
        for feature in &features {
            feature.scheduler().attach(ticker.as_ref());
        }
        let events = ctx.subscribe(Topic::Scheduler);

        Ok(Self {
            config,
            clock,
            ticker,
            world,
            ctx,
            features,
            events,
            failures: Vec::new(),
        })
    }

    pub fn run(mut self) -> Result<Summary> {
        info!(
            target: "host_sim",
            frames = self.config.frames,
            frame_ms = duration_millis(self.config.frame_interval),
            party_size = self.config.party_size,
            "simulation started"
        );

        for _ in 0..self.config.frames {
            self.clock.advance(self.config.frame_interval);
            self.world.replay(self.ticker.frame_index() + 1);
            for feature in &mut self.features {
                feature.poll();
            }
            self.ticker.advance();
            self.drain_events();

            if self.config.realtime {
                std::thread::sleep(self.config.frame_interval);
            }
        }

        self.shutdown();
        Ok(Summary {
            frames: self.ticker.frame_index(),
            metrics: self.ctx.gate().metrics(),
            casts: self.world.casts(),
            failures: self.failures,
            party: self.world.party(),
        })
    }

    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(Event::Scheduler(SchedulerEvent::Failed { scheduler, failure })) => {
                    self.failures.push((scheduler, failure));
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(target: "host_sim", skipped, "scheduler events lagged");
                }
                Err(_) => break,
            }
        }
    }

    fn shutdown(&mut self) {
        for feature in &self.features {
            feature.scheduler().detach(self.ticker.as_ref());
            self.ctx.arbiter().release_all(feature.name());
        }
        self.ctx.detach(self.ticker.as_ref());
        self.drain_events();
    }
}

/// What happened during one run.
#[derive(Debug)]
pub struct Summary {
    pub frames: u64,
    pub metrics: GateMetricsSnapshot,
    pub casts: Vec<Cast>,
    pub failures: Vec<(String, QueueFailure)>,
    pub party: Vec<Member>,
}

impl Summary {
    pub fn log(&self) {
        let m = &self.metrics;
        info!(
            target: "host_sim",
            frames = self.frames,
            issued = m.issued,
            prevented = m.prevented,
            dropped = m.dropped,
            throttled = m.throttled,
            failed = m.failed,
            cancelled = m.cancelled,
            "simulation finished"
        );
        for (scheduler, failure) in &self.failures {
            warn!(
                target: "host_sim",
                scheduler = scheduler.as_str(),
                step = %failure.step,
                reason = ?failure.reason,
                "sequence failed"
            );
        }
        for member in &self.party {
            info!(target: "host_sim", member = %member.name, hp = member.hp_percent(), "final state");
        }
    }
}
