//! Error types surfaced by the runtime API.
//!
//! Step failures and dispatch outcomes are not errors here: they are recovered
//! inside the scheduler or returned as values. Only construction and
//! configuration problems reach the host as [`CoreError`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("gate context requires an action bridge before building")]
    MissingBridge,

    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(String),
}

/// Error a step body returns to fail its queue.
///
/// Wrap foreign errors with [`StepFault::with_source`]; plain messages
/// convert through `From`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StepFault {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StepFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for StepFault {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for StepFault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
