//! Error types for Fanout

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for Fanout setup operations
pub type FanoutResult<T> = Result<T, FanoutError>;

/// Result type alias for task bodies
pub type TaskResult = Result<(), TaskError>;

/// Errors raised while setting up a runner (never by the tasks themselves)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FanoutError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),
}

impl FanoutError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<std::io::Error> for FanoutError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

/// Outcome of a task that did not succeed.
///
/// The cancellation variants are markers produced by the runner or by a
/// [`CancelSignal`](crate::signal::CancelSignal); `Failed` and `Panicked` come
/// from the task body itself. Callers tell them apart by variant, never by
/// message text.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// The task's own logic returned an error
    #[error("{0:#}")]
    Failed(Arc<anyhow::Error>),

    /// The signal was cancelled explicitly
    #[error("task was cancelled")]
    Cancelled,

    /// The signal's deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The task never ran because the runner cancelled itself after an
    /// earlier task failed
    #[error("task skipped after an earlier failure")]
    Aborted,

    /// The task body panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Wrap a task's own error
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        Self::Failed(Arc::new(error.into()))
    }

    /// Create a task failure from a plain message
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Failed(Arc::new(anyhow::Error::msg(message)))
    }

    /// Build a `Panicked` error from a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        Self::Panicked(message)
    }

    /// Build an error from a failed join of a blocking task
    pub fn from_join_error(error: tokio::task::JoinError) -> Self {
        match error.try_into_panic() {
            Ok(payload) => Self::from_panic(payload),
            // The runtime dropped the task before it finished, which is not
            // a cancellation of the runner's signal
            Err(_) => Self::msg("blocking task was dropped before it finished"),
        }
    }

    /// True for every variant that means "this task's body did not decide the
    /// outcome": external cancel, deadline, and the runner's own abort marker
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded | Self::Aborted)
    }

    /// True only for the runner's "skipped after an earlier failure" marker
    pub fn is_skip_marker(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// The underlying task error, if this is a `Failed` outcome
    pub fn as_failure(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl PartialEq for TaskError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Failed(a), Self::Failed(b)) => Arc::ptr_eq(a, b),
            (Self::Cancelled, Self::Cancelled)
            | (Self::DeadlineExceeded, Self::DeadlineExceeded)
            | (Self::Aborted, Self::Aborted) => true,
            (Self::Panicked(a), Self::Panicked(b)) => a == b,
            _ => false,
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        Self::Failed(Arc::new(error))
    }
}
