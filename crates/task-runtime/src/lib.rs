//! Frame-driven task runtime for in-game automation features.
//!
//! Features such as auto-heal or auto-raise decide *what* to do; this crate
//! decides *when* and *whether* it happens. It provides:
//! - [`scheduler`]: per-feature step queues advanced one step per frame,
//!   with retry delays, time limits and re-entrant abort
//! - [`gate`]: the shared action dispatch gate with interceptors, priority
//!   arbitration between features and throttled issuing
//! - [`arbiter`]: keyed mutual exclusion so two features never drive the
//!   same multi-step sequence at once
//! - [`throttle`]: keyed cooldown checks
//! - [`tick`] and [`clock`]: the host-supplied frame and time sources
//! - [`context`]: the shared object that wires all of the above together
//!
//! Everything runs on the host's frame thread. Shared structures are guarded
//! against re-entrant mutation (a step aborting its own queue, an interceptor
//! registering another), not against parallel callers.
pub mod arbiter;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod gate;
pub mod metrics;
pub mod scheduler;
pub mod throttle;
pub mod tick;

pub use arbiter::{Claim, ConflictArbiter};
pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp, duration_millis};
pub use config::RuntimeConfig;
pub use context::{GateContext, GateContextBuilder};
pub use error::{CoreError, Result, StepFault};
pub use events::{ArbiterEvent, DispatchEvent, Event, EventBus, SchedulerEvent, Topic};
pub use gate::{
    ActionBridge, ActionDispatchGate, ActionIntent, ActionKind, DispatchOutcome, DispatchTicket,
    Interception, Interceptor, InterceptorId, IssueRefusal, Location,
};
pub use metrics::{GateMetrics, GateMetricsSnapshot};
pub use scheduler::{
    FailureReason, Outcome, QueueFailure, SchedulerDefaults, SchedulerState, Step, StepContext,
    StepOptions, StepResult, StepScheduler,
};
pub use throttle::Throttler;
pub use tick::{Frame, FrameTicker, SubscriptionId, TickHandler, TickSource};
