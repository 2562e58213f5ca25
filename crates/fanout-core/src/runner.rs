//! Bounded-concurrency task runner
//!
//! A [`Runner`] spawns independently failing tasks, optionally caps how many
//! execute at once, and collects every error they produce. With
//! `cancel_on_failure` it also derives its own [`CancelSignal`] and cancels it
//! on the first failure, so tasks that have not started yet are skipped.

use crate::collector::ErrorCollector;
use crate::config::RunnerConfig;
use crate::error::TaskError;
use crate::signal::CancelSignal;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};

/// Runs tasks concurrently and aggregates their errors
///
/// Tasks are spawned on the ambient tokio runtime, so [`Runner::go`] must be
/// called from within one. Calling `go` on a runner from inside one of its own
/// tasks is not supported: with a limit in place the inner call can wait on a
/// permit held by its caller forever.
///
/// # Example
///
/// ```rust
/// use fanout_core::{CancelSignal, Runner, RunnerConfig, TaskError};
///
/// # #[tokio::main]
/// # async fn main() {
/// let runner = Runner::new(&CancelSignal::new(), RunnerConfig::default().with_limit(2));
///
/// for i in 0..4 {
///     runner
///         .go(move || async move {
///             if i == 3 {
///                 return Err(TaskError::msg("task 3 failed"));
///             }
///             Ok(())
///         })
///         .await;
/// }
///
/// let errors = runner.wait().await;
/// assert_eq!(errors.len(), 1);
/// # }
/// ```
#[derive(Debug)]
pub struct Runner {
    shared: Arc<Shared>,
    /// Admission gate, absent when unlimited
    gate: Option<Arc<Semaphore>>,
    /// Tasks admitted but not yet finished
    outstanding: Arc<watch::Sender<usize>>,
    config: RunnerConfig,
}

/// State reachable from spawned tasks
#[derive(Debug)]
struct Shared {
    signal: CancelSignal,
    trigger: Option<FailureTrigger>,
    errors: ErrorCollector,
}

/// Cancels the runner's derived signal once, on the first failure
#[derive(Debug)]
struct FailureTrigger {
    signal: CancelSignal,
    first_failure: OnceLock<TaskError>,
}

impl FailureTrigger {
    fn new(signal: CancelSignal) -> Self {
        Self {
            signal,
            first_failure: OnceLock::new(),
        }
    }

    fn fire(&self, error: &TaskError) {
        if self.first_failure.set(error.clone()).is_err() {
            return;
        }
        if self.signal.cancel_with_cause(error.clone()) {
            tracing::warn!(error = %error, "task failed, cancelling remaining tasks");
        }
    }
}

/// Holds one admission slot for the lifetime of a task
///
/// Dropping it releases the permit and then decrements the outstanding count,
/// on every exit path including unwinding.
struct InFlight {
    outstanding: Arc<watch::Sender<usize>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl InFlight {
    fn enter(outstanding: Arc<watch::Sender<usize>>, permit: Option<OwnedSemaphorePermit>) -> Self {
        outstanding.send_modify(|count| *count += 1);
        Self {
            outstanding,
            permit,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.outstanding
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

impl Shared {
    async fn execute<F, Fut, E>(&self, task: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<TaskError>,
    {
        let outcome = match self.signal.cause() {
            Some(cause) => {
                let skipped = skip_cause(cause);
                tracing::debug!(cause = %skipped, "runner signal cancelled, skipping task");
                Err(skipped)
            }
            None => match AssertUnwindSafe(async move { task().await })
                .catch_unwind()
                .await
            {
                Ok(result) => result.map_err(Into::into),
                Err(payload) => Err(TaskError::from_panic(payload)),
            },
        };

        // Skipped and executed tasks complete the same way
        if let Err(error) = outcome {
            tracing::debug!(error = %error, "task did not succeed");
            self.errors.append(error.clone());
            if let Some(trigger) = &self.trigger {
                trigger.fire(&error);
            }
        }
    }
}

/// Map a signal's cause to the error recorded for a skipped task
///
/// External cancellation and deadlines pass through unchanged. Anything else,
/// in particular the failure that fired the runner's own trigger, becomes
/// [`TaskError::Aborted`] so skipped tasks never repeat another task's error.
fn skip_cause(cause: TaskError) -> TaskError {
    match cause {
        TaskError::Cancelled | TaskError::DeadlineExceeded => cause,
        _ => TaskError::Aborted,
    }
}

impl Runner {
    /// Create a runner bound to `parent`
    ///
    /// With `cancel_on_failure` the runner works on a child of `parent`;
    /// otherwise it uses `parent` as is. Cancelling `parent` is observed
    /// either way.
    pub fn new(parent: &CancelSignal, config: RunnerConfig) -> Self {
        let (signal, trigger) = if config.cancel_on_failure {
            let derived = parent.child();
            (derived.clone(), Some(FailureTrigger::new(derived)))
        } else {
            (parent.clone(), None)
        };

        let gate = (config.limit > 0)
            .then(|| Arc::new(Semaphore::new(config.limit.min(Semaphore::MAX_PERMITS))));
        let (outstanding, _) = watch::channel(0usize);

        tracing::debug!(
            limit = config.limit,
            cancel_on_failure = config.cancel_on_failure,
            "runner created"
        );

        Self {
            shared: Arc::new(Shared {
                signal,
                trigger,
                errors: ErrorCollector::new(),
            }),
            gate,
            outstanding: Arc::new(outstanding),
            config,
        }
    }

    /// Submit a task
    ///
    /// Waits for a free slot when a limit is configured, then spawns the task
    /// and returns without running it. If the runner's signal is already
    /// cancelled when the task would start, its body is not invoked and the
    /// skip is recorded instead. Errors, including panics, surface only
    /// through [`Runner::wait`].
    pub async fn go<F, Fut, E>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<TaskError> + Send + 'static,
    {
        let permit = match &self.gate {
            // The gate is never closed, so acquiring only fails if it was
            Some(gate) => gate.clone().acquire_owned().await.ok(),
            None => None,
        };

        let slot = InFlight::enter(self.outstanding.clone(), permit);
        tracing::trace!(in_flight = self.in_flight(), "task admitted");

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let _slot = slot;
            shared.execute(task).await;
        });
    }

    /// Submit a synchronous task
    ///
    /// Same admission and error semantics as [`Runner::go`]; the closure runs
    /// on tokio's blocking thread pool.
    pub async fn go_blocking<F, E>(&self, task: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<TaskError> + Send + 'static,
    {
        self.go(move || async move {
            match tokio::task::spawn_blocking(task).await {
                Ok(result) => result.map_err(Into::into),
                Err(error) => Err(TaskError::from_join_error(error)),
            }
        })
        .await
    }

    /// Wait for every submitted task to finish and return all errors so far
    ///
    /// Errors are in completion order. The collection is not cleared, so a
    /// later call also returns the errors seen by earlier calls.
    pub async fn wait(&self) -> Vec<TaskError> {
        let mut idle = self.outstanding.subscribe();
        // The sender is owned by `self`, so it cannot close while we wait
        let _ = idle.wait_for(|count| *count == 0).await;
        self.shared.errors.snapshot()
    }

    /// Number of tasks admitted but not yet finished
    pub fn in_flight(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// The concurrency ceiling, `None` when unlimited
    pub fn limit(&self) -> Option<usize> {
        self.gate.as_ref().map(|_| self.config.limit)
    }

    /// The configuration this runner was built with
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The first unsuccessful outcome observed with `cancel_on_failure`
    /// enabled, a skip marker included
    pub fn failure_cause(&self) -> Option<TaskError> {
        self.shared
            .trigger
            .as_ref()
            .and_then(|trigger| trigger.first_failure.get().cloned())
    }

    /// A clone of the signal tasks are checked against
    ///
    /// Long-running task bodies can poll it to stop early; the runner itself
    /// never interrupts a task that has started.
    pub fn signal(&self) -> CancelSignal {
        self.shared.signal.clone()
    }
}
