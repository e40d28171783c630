//! Topic-based event bus implementation.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter};
use tokio::sync::broadcast;

use super::types::{ArbiterEvent, DispatchEvent, SchedulerEvent};

/// Topics for event routing
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Topic {
    /// Step queue transitions and failures
    Scheduler,
    /// Resolved action intents
    Dispatch,
    /// Conflict token claims and releases
    Arbiter,
}

/// Event wrapper that carries the topic and typed event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Scheduler(SchedulerEvent),
    Dispatch(DispatchEvent),
    Arbiter(ArbiterEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::Scheduler(_) => Topic::Scheduler,
            Event::Dispatch(_) => Topic::Dispatch,
            Event::Arbiter(_) => Topic::Arbiter,
        }
    }
}

impl From<SchedulerEvent> for Event {
    fn from(event: SchedulerEvent) -> Self {
        Event::Scheduler(event)
    }
}

impl From<DispatchEvent> for Event {
    fn from(event: DispatchEvent) -> Self {
        Event::Dispatch(event)
    }
}

impl From<ArbiterEvent> for Event {
    fn from(event: ArbiterEvent) -> Self {
        Event::Arbiter(event)
    }
}

/// Topic-based event bus
///
/// Consumers subscribe to the topics they care about. Receivers are plain
/// broadcast receivers, so a synchronous host can drain them with
/// `try_recv` between frames.
#[derive(Clone)]
pub struct EventBus {
    scheduler: broadcast::Sender<Event>,
    dispatch: broadcast::Sender<Event>,
    arbiter: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new event bus with default capacity for each topic
    pub fn new() -> Self {
        Self::with_capacity(128)
    }

    /// Creates a new event bus with specified capacity per topic
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            scheduler: broadcast::channel(capacity).0,
            dispatch: broadcast::channel(capacity).0,
            arbiter: broadcast::channel(capacity).0,
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Scheduler => &self.scheduler,
            Topic::Dispatch => &self.dispatch,
            Topic::Arbiter => &self.arbiter,
        }
    }

    /// Publish an event to its corresponding topic
    ///
    /// Best effort: an event published with no subscribers is discarded.
    pub fn publish(&self, event: impl Into<Event>) {
        let event = event.into();
        let topic = event.topic();
        if self.sender(topic).send(event).is_err() {
            tracing::trace!(target: "task_runtime::events", topic = topic.as_ref(), "no subscribers");
        }
    }

    /// Subscribe to a specific topic
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.sender(topic).subscribe()
    }

    /// Subscribe to multiple topics
    pub fn subscribe_multiple(&self, topics: &[Topic]) -> Vec<(Topic, broadcast::Receiver<Event>)> {
        topics
            .iter()
            .map(|&topic| (topic, self.subscribe(topic)))
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use strum::IntoEnumIterator;
        let mut s = f.debug_struct("EventBus");
        for topic in Topic::iter() {
            s.field(topic.as_ref(), &self.sender(topic).receiver_count());
        }
        s.finish()
    }
}
