//! Automation features driven by the simulation.
//!
//! Each feature decides what to do from the world state and hands the
//! resulting sequence to its own [`StepScheduler`]. Sequences that touch the
//! party target claim [`PARTY_TARGET`] first so two features never drive it
//! at the same time.

mod auto_heal;
mod auto_raise;

pub use auto_heal::AutoHeal;
pub use auto_raise::AutoRaise;

use std::sync::Arc;
use std::time::Duration;

use task_runtime::{
    ActionDispatchGate, ActionIntent, DispatchOutcome, DispatchTicket, IssueRefusal, Outcome,
    Step, StepContext, StepResult, StepScheduler,
};

/// Arbiter key for sequences that select a party member as target.
pub const PARTY_TARGET: &str = "party_target";

const NOT_READY_BACKOFF: Duration = Duration::from_millis(250);

pub trait Feature {
    fn name(&self) -> &'static str;

    /// Inspects the world and enqueues work. Called once per frame, before
    /// the frame fires.
    fn poll(&mut self);

    fn scheduler(&self) -> &StepScheduler;
}

/// Step that dispatches an intent through the gate and waits for the
/// outcome.
///
/// Throttled or not-ready intents are dispatched again after a backoff;
/// every other non-issued outcome aborts the sequence.
pub struct DispatchStep {
    gate: Arc<ActionDispatchGate>,
    intent: ActionIntent,
    ticket: Option<DispatchTicket>,
}

impl DispatchStep {
    pub fn new(gate: Arc<ActionDispatchGate>, intent: ActionIntent) -> Self {
        Self {
            gate,
            intent,
            ticket: None,
        }
    }
}

impl Step for DispatchStep {
    fn run(&mut self, ctx: &mut StepContext<'_>) -> StepResult {
        let ticket = self
            .ticket
            .get_or_insert_with(|| self.gate.dispatch(self.intent.clone()));

        let outcome = match ticket.outcome() {
            None => return Ok(Outcome::retry()),
            Some(outcome) => outcome,
        };

        match outcome {
            DispatchOutcome::Issued => Ok(Outcome::Done),
            DispatchOutcome::Throttled { remaining } => {
                self.ticket = None;
                Ok(Outcome::retry_after(remaining))
            }
            DispatchOutcome::IssueFailed(IssueRefusal::NotReady) => {
                self.ticket = None;
                Ok(Outcome::retry_after(NOT_READY_BACKOFF))
            }
            other => Ok(Outcome::abort(format!(
                "{} resolved {}",
                ctx.step_name(),
                other.as_ref()
            ))),
        }
    }
}
