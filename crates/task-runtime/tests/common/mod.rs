#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use task_runtime::{
    ActionBridge, ActionIntent, ActionKind, Frame, FrameTicker, GateContext, IssueRefusal,
    ManualClock, RuntimeConfig, Timestamp,
};

/// Bridge that records every issued intent and refuses configured ids.
#[derive(Default)]
pub struct RecordingBridge {
    issued: Mutex<Vec<ActionIntent>>,
    refused: Mutex<HashSet<u32>>,
    calls: Mutex<usize>,
}

impl RecordingBridge {
    pub fn issued(&self) -> Vec<ActionIntent> {
        self.issued.lock().clone()
    }

    pub fn issued_ids(&self) -> Vec<u32> {
        self.issued.lock().iter().map(|i| i.action_id).collect()
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }

    pub fn refuse(&self, action_id: u32) {
        self.refused.lock().insert(action_id);
    }

    pub fn accept(&self, action_id: u32) {
        self.refused.lock().remove(&action_id);
    }
}

impl ActionBridge for RecordingBridge {
    fn is_ready(&self, _kind: ActionKind, action_id: u32) -> bool {
        !self.refused.lock().contains(&action_id)
    }

    fn issue(&self, intent: &ActionIntent) -> Result<(), IssueRefusal> {
        *self.calls.lock() += 1;
        if self.refused.lock().contains(&intent.action_id) {
            return Err(IssueRefusal::NotReady);
        }
        self.issued.lock().push(intent.clone());
        Ok(())
    }
}

/// A host stand-in: manual clock, frame ticker, recording bridge and an
/// attached gate context.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub ticker: Arc<FrameTicker>,
    pub bridge: Arc<RecordingBridge>,
    pub ctx: GateContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let clock = Arc::new(ManualClock::starting_at(10_000));
        let ticker = Arc::new(FrameTicker::new(clock.clone()));
        let bridge = Arc::new(RecordingBridge::default());
        let ctx = GateContext::builder()
            .config(config)
            .clock(clock.clone())
            .bridge(bridge.clone())
            .build()
            .expect("context should build");
        ctx.attach(ticker.as_ref());
        Self {
            clock,
            ticker,
            bridge,
            ctx,
        }
    }

    /// Advances the clock by `ms` and fires one frame.
    pub fn frame(&self, ms: u64) -> Frame {
        self.clock.advance_ms(ms);
        self.ticker.advance()
    }

    pub fn frames(&self, count: usize, ms: u64) {
        for _ in 0..count {
            self.frame(ms);
        }
    }
}

/// Frame for driving a scheduler directly, without a ticker.
pub fn frame_at(index: u64, ms: u64) -> Frame {
    Frame {
        index,
        now: Timestamp(ms),
    }
}
