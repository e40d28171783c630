//! Runtime configuration and environment loaders.
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Tunables shared by every scheduler and the dispatch gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Time a step may stay current before the queue times out.
    pub default_time_limit: Duration,
    /// Lane used by `enqueue` when no priority is given. Higher runs first.
    pub default_priority: u8,
    /// Whether a timed-out step fails the whole queue or is skipped alone.
    pub abort_on_timeout: bool,
    /// Minimum spacing between two issued actions sharing a dedup key.
    pub dispatch_interval: Duration,
    /// Capacity of each event bus topic.
    pub event_buffer_size: usize,
    /// How often contention on one arbiter key is logged.
    pub contention_log_interval: Duration,
}

impl RuntimeConfig {
    pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(10);
    pub const DEFAULT_PRIORITY: u8 = 1;
    pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 128;
    pub const DEFAULT_CONTENTION_LOG_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self {
            default_time_limit: Self::DEFAULT_TIME_LIMIT,
            default_priority: Self::DEFAULT_PRIORITY,
            abort_on_timeout: true,
            dispatch_interval: Self::DEFAULT_DISPATCH_INTERVAL,
            event_buffer_size: Self::DEFAULT_EVENT_BUFFER_SIZE,
            contention_log_interval: Self::DEFAULT_CONTENTION_LOG_INTERVAL,
        }
    }

    /// Construct configuration from process environment variables.
    ///
    /// Environment variables:
    /// - `TASK_TIME_LIMIT_MS` - Per-step time limit (default: 10000)
    /// - `TASK_DEFAULT_PRIORITY` - Default lane priority (default: 1)
    /// - `TASK_ABORT_ON_TIMEOUT` - Fail the whole queue on timeout (default: true)
    /// - `DISPATCH_INTERVAL_MS` - Default throttle window per dedup key (default: 500)
    /// - `EVENT_BUFFER_SIZE` - Event bus capacity per topic (default: 128)
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = read_env::<u64>("TASK_TIME_LIMIT_MS") {
            config.default_time_limit = Duration::from_millis(ms);
        }
        if let Some(priority) = read_env::<u8>("TASK_DEFAULT_PRIORITY") {
            config.default_priority = priority;
        }
        if let Some(abort) = read_env::<bool>("TASK_ABORT_ON_TIMEOUT") {
            config.abort_on_timeout = abort;
        }
        if let Some(ms) = read_env::<u64>("DISPATCH_INTERVAL_MS") {
            config.dispatch_interval = Duration::from_millis(ms);
        }
        if let Some(capacity) = read_env::<usize>("EVENT_BUFFER_SIZE") {
            config.event_buffer_size = capacity.max(1);
        }

        config
    }

    /// Rejects configurations the runtime cannot honor.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.default_time_limit.is_zero() {
            return Err(CoreError::InvalidConfig(
                "default_time_limit must be greater than zero".into(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(CoreError::InvalidConfig(
                "event_buffer_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok()?.trim().parse().ok()
}
