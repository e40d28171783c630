//! Topic-based event bus for runtime diagnostics.
//!
//! Schedulers, the dispatch gate and the arbiter publish what they did here.
//! Nothing in the core depends on anyone listening.

mod bus;
mod types;

pub use bus::{Event, EventBus, Topic};
pub use types::{ArbiterEvent, DispatchEvent, SchedulerEvent};
