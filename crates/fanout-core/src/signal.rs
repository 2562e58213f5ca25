//! Cancellation signal with a recorded cause
//!
//! [`CancelSignal`] wraps a [`CancellationToken`] and adds the two things a
//! runner needs to explain *why* work stopped: a cause recorded by whoever
//! cancelled first, and an optional deadline. Signals form a tree; a child is
//! cancelled whenever any ancestor is, while cancelling a child leaves the
//! parent untouched.

use crate::error::TaskError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Pollable, derivable cancellation signal carrying a cause
///
/// # Example
///
/// ```rust
/// use fanout_core::{CancelSignal, TaskError};
///
/// let parent = CancelSignal::new();
/// let child = parent.child();
///
/// parent.cancel();
/// assert!(child.is_cancelled());
/// assert_eq!(child.cause(), Some(TaskError::Cancelled));
/// ```
#[derive(Debug, Clone)]
pub struct CancelSignal {
    inner: Arc<SignalNode>,
}

#[derive(Debug)]
struct SignalNode {
    token: CancellationToken,
    /// Set exactly once, before `token` is cancelled
    cause: OnceLock<TaskError>,
    deadline: Option<Instant>,
    parent: Option<Arc<SignalNode>>,
    /// Own cause lost a race with an ancestor's cancellation
    deferred: AtomicBool,
}

impl SignalNode {
    fn root(deadline: Option<Instant>) -> Self {
        Self {
            token: CancellationToken::new(),
            cause: OnceLock::new(),
            deadline,
            parent: None,
            deferred: AtomicBool::new(false),
        }
    }

    /// Check the token and every deadline in the chain, latching an expired
    /// deadline into a real cancellation on the node that owns it.
    fn poll(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        if let Some(parent) = &self.parent {
            if parent.poll() {
                return true;
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.trigger(TaskError::DeadlineExceeded);
                return true;
            }
        }
        false
    }

    fn trigger(&self, cause: TaskError) -> bool {
        if self.cause.set(cause).is_ok() {
            self.token.cancel();
            true
        } else {
            false
        }
    }

    /// Defer to an ancestor cancelled after this node recorded its own cause
    fn yield_to_ancestor(&self) -> bool {
        let ancestor_cancelled = self.parent.as_ref().is_some_and(|parent| parent.poll());
        if ancestor_cancelled {
            self.deferred.store(true, Ordering::Release);
        }
        ancestor_cancelled
    }

    fn resolve_cause(&self) -> Option<TaskError> {
        if !self.deferred.load(Ordering::Acquire) {
            if let Some(cause) = self.cause.get() {
                return Some(cause.clone());
            }
        }
        self.parent.as_ref().and_then(|parent| parent.resolve_cause())
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        let inherited = self
            .parent
            .as_ref()
            .and_then(|parent| parent.earliest_deadline());
        match (self.deadline, inherited) {
            (Some(own), Some(inherited)) => Some(own.min(inherited)),
            (own, inherited) => own.or(inherited),
        }
    }
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// Create a root signal that is only cancelled on request
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalNode::root(None)),
        }
    }

    /// Create a root signal that reports `DeadlineExceeded` once `deadline`
    /// has passed
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(SignalNode::root(Some(deadline))),
        }
    }

    /// Create a root signal that expires after `timeout`
    ///
    /// A timeout too large to represent as an [`Instant`] means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SignalNode::root(deadline_after(timeout))),
        }
    }

    /// Derive a child signal
    ///
    /// The child is cancelled whenever this signal is; cancelling the child
    /// does not affect this signal.
    pub fn child(&self) -> Self {
        self.derive(None)
    }

    /// Derive a child signal with an additional deadline
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        self.derive(deadline_after(timeout))
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(SignalNode {
                token: self.inner.token.child_token(),
                cause: OnceLock::new(),
                deadline,
                parent: Some(self.inner.clone()),
                deferred: AtomicBool::new(false),
            }),
        }
    }

    /// Cancel with cause [`TaskError::Cancelled`]
    pub fn cancel(&self) {
        self.cancel_with_cause(TaskError::Cancelled);
    }

    /// Cancel with the given cause
    ///
    /// Returns `true` if this call cancelled the signal. Once the signal is
    /// cancelled, by itself, an ancestor or a deadline, further calls are
    /// no-ops and the first cause is kept.
    ///
    /// If an ancestor is cancelled while this call is recording its cause,
    /// the ancestor is treated as having come first: the call returns `false`
    /// and [`cause`](Self::cause) reports the ancestor's cause.
    pub fn cancel_with_cause(&self, cause: TaskError) -> bool {
        if self.inner.poll() {
            return false;
        }
        if !self.inner.trigger(cause) {
            return false;
        }
        !self.inner.yield_to_ancestor()
    }

    /// Whether this signal, or any ancestor, has been cancelled or has expired
    pub fn is_cancelled(&self) -> bool {
        self.inner.poll()
    }

    /// The cause of cancellation, or `None` while the signal is live
    pub fn cause(&self) -> Option<TaskError> {
        if !self.inner.poll() {
            return None;
        }
        Some(self.inner.resolve_cause().unwrap_or(TaskError::Cancelled))
    }

    /// The earliest deadline that applies to this signal
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.earliest_deadline()
    }

    /// Wait until the signal is cancelled or its deadline passes
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }

        match self.inner.earliest_deadline() {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline.into()) => {
                        self.inner.poll();
                    }
                }
            }
            None => self.inner.token.cancelled().await,
        }
    }
}
