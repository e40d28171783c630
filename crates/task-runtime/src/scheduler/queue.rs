//! Priority lanes backing a step queue.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::clock::Timestamp;

use super::step::Step;

/// Wait requested through `delay_next` and `delay_next_frames`, armed when
/// the step first reaches the head of the queue. Both parts must elapse.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InitialDelay {
    pub time: Duration,
    pub frames: u64,
}

impl InitialDelay {
    pub fn add_time(&mut self, delay: Duration) {
        self.time = self.time.saturating_add(delay);
    }

    pub fn add_frames(&mut self, frames: u64) {
        self.frames = self.frames.saturating_add(frames);
    }
}

pub(crate) struct Entry {
    pub name: String,
    pub step: Box<dyn Step>,
    pub priority: u8,
    pub time_limit: Duration,
    pub abort_on_timeout: bool,
    pub retry_delay: Duration,
    pub initial_delay: InitialDelay,
    /// Earliest time of the next attempt.
    pub ready_at: Option<Timestamp>,
    /// Earliest frame index of the next attempt.
    pub ready_frame: Option<u64>,
    /// Enqueue time plus `time_limit`. Unset only until the scheduler has
    /// seen its first frame.
    pub deadline: Option<Timestamp>,
    pub attempts: u32,
    /// Set once the initial delay has been converted into `ready_*`.
    pub armed: bool,
}

impl Entry {
    /// Converts the initial delay into absolute wait marks.
    pub fn arm(&mut self, now: Timestamp, frame: u64) {
        if self.armed {
            return;
        }
        self.armed = true;
        let delay = std::mem::take(&mut self.initial_delay);
        if !delay.time.is_zero() {
            self.ready_at = Some(now + delay.time);
        }
        if delay.frames > 0 {
            self.ready_frame = Some(frame.saturating_add(delay.frames));
        }
    }

    /// Sets the deadline from `enqueued_at` unless it is already set.
    pub fn stamp(&mut self, enqueued_at: Timestamp) {
        if self.deadline.is_none() {
            self.deadline = Some(enqueued_at + self.time_limit);
        }
    }

    pub fn is_ready(&self, now: Timestamp, frame: u64) -> bool {
        self.ready_at.is_none_or(|at| now >= at) && self.ready_frame.is_none_or(|f| frame >= f)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.deadline.is_some_and(|deadline| now > deadline)
    }
}

/// Steps grouped by priority; higher priorities drain first, each lane FIFO.
#[derive(Default)]
pub(crate) struct Lanes {
    lanes: BTreeMap<u8, VecDeque<Entry>>,
}

impl Lanes {
    pub fn push_back(&mut self, entry: Entry) {
        self.lanes.entry(entry.priority).or_default().push_back(entry);
    }

    pub fn push_front(&mut self, entry: Entry) {
        self.lanes.entry(entry.priority).or_default().push_front(entry);
    }

    /// Removes the head of the highest non-empty lane.
    pub fn pop_head(&mut self) -> Option<Entry> {
        let mut lane = self.lanes.last_entry()?;
        let entry = lane.get_mut().pop_front();
        if lane.get().is_empty() {
            lane.remove();
        }
        entry
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.lanes.values_mut().flat_map(|lane| lane.iter_mut())
    }

    /// Removes the first expired entry, scanning lanes from the highest
    /// priority down.
    pub fn take_expired(&mut self, now: Timestamp) -> Option<Entry> {
        let (priority, index) = self.lanes.iter().rev().find_map(|(&priority, lane)| {
            lane.iter()
                .position(|entry| entry.is_expired(now))
                .map(|index| (priority, index))
        })?;
        let lane = self.lanes.get_mut(&priority)?;
        let entry = lane.remove(index);
        if lane.is_empty() {
            self.lanes.remove(&priority);
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.lanes.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.lanes.clear();
        count
    }

    pub fn remove_lane(&mut self, priority: u8) -> usize {
        self.lanes.remove(&priority).map_or(0, |lane| lane.len())
    }
}
