//! Thread-safe, append-only error collection

use crate::error::TaskError;
use parking_lot::Mutex;

/// Ordered collection of task errors shared by concurrently finishing tasks
///
/// Every access goes through a single mutex, so a snapshot never observes a
/// half-applied append.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Mutex<Vec<TaskError>>,
}

impl ErrorCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error at the end of the sequence
    pub fn append(&self, error: TaskError) {
        self.errors.lock().push(error);
    }

    /// Copy of every error recorded so far, in append order
    ///
    /// The returned vector is independent of the collector; later appends do
    /// not show up in it.
    pub fn snapshot(&self) -> Vec<TaskError> {
        self.errors.lock().clone()
    }

    /// Number of recorded errors
    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    /// Whether no error has been recorded
    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}
