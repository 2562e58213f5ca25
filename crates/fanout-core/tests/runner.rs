//! Integration tests for the task runner
//!
//! Exercises admission limits, error aggregation, cancel-on-failure and
//! parent cancellation through the public API only.

use fanout_core::{CancelSignal, Runner, RunnerConfig, TaskError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Barrier, oneshot};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Stagger task durations so tasks overlap without relying on randomness
fn stagger(index: usize) -> Duration {
    Duration::from_millis(((index * 7) % 20) as u64)
}

async fn run_batch(limit: usize, total: usize, failures: usize) -> (Vec<TaskError>, usize) {
    let runner = Runner::new(&CancelSignal::new(), RunnerConfig::default().with_limit(limit));
    let successes = Arc::new(AtomicUsize::new(0));

    for i in 0..total {
        let successes = successes.clone();
        let fail = i < failures;
        runner
            .go(move || async move {
                tokio::time::sleep(stagger(i)).await;
                if fail {
                    return Err(TaskError::msg(format!("task {i} failed")));
                }
                successes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
    }

    let errors = runner.wait().await;
    (errors, successes.load(Ordering::SeqCst))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_errors_and_successes_are_counted() {
    init_tracing();

    let cases = [
        // (limit, total, failures)
        (0, 64, 0),
        (0, 64, 32),
        (0, 64, 64),
        (1, 64, 0),
        (1, 64, 16),
        (1, 64, 64),
        (16, 64, 0),
        (16, 64, 16),
        (16, 64, 64),
    ];

    for (limit, total, failures) in cases {
        let (errors, successes) = run_batch(limit, total, failures).await;
        assert_eq!(
            errors.len(),
            failures,
            "limit {limit}: wrong error count"
        );
        assert_eq!(
            successes,
            total - failures,
            "limit {limit}: wrong success count"
        );
        assert!(errors.iter().all(|e| !e.is_cancellation()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_limit_is_never_exceeded() {
    for limit in [1usize, 3, 8] {
        let runner = Runner::new(&CancelSignal::new(), RunnerConfig::default().with_limit(limit));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..48 {
            let running = running.clone();
            let peak = peak.clone();
            runner
                .go(move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(now <= limit, "{now} tasks running with limit {limit}");
                    tokio::time::sleep(stagger(i)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, TaskError>(())
                })
                .await;
            assert!(runner.in_flight() <= limit);
        }

        let errors = runner.wait().await;
        assert!(errors.is_empty(), "limit {limit}: {errors:?}");
        assert!(peak.load(Ordering::SeqCst) <= limit);
        assert_eq!(runner.in_flight(), 0);
    }
}

#[tokio::test]
async fn test_go_suspends_at_capacity() {
    let runner = Runner::new(&CancelSignal::new(), RunnerConfig::default().with_limit(1));
    let (release_tx, release_rx) = oneshot::channel::<()>();

    runner
        .go(move || async move {
            let _ = release_rx.await;
            Ok::<_, TaskError>(())
        })
        .await;

    // The only slot is taken, so a second submission cannot be admitted yet
    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        runner.go(|| async { Ok::<_, TaskError>(()) }),
    )
    .await;
    assert!(blocked.is_err());

    release_tx.send(()).unwrap();
    tokio::time::timeout(
        Duration::from_secs(1),
        runner.go(|| async { Ok::<_, TaskError>(()) }),
    )
    .await
    .expect("slot should free up once the first task finishes");

    assert!(runner.wait().await.is_empty());
}

async fn run_sequential_with_failure(fail_at: Option<usize>) -> (Runner, Vec<TaskError>, Option<TaskError>) {
    let runner = Runner::new(
        &CancelSignal::new(),
        RunnerConfig::default().with_cancel_on_failure(true),
    );
    let mut original = None;

    for i in 0..8 {
        let result = if fail_at == Some(i) {
            let error = TaskError::msg("test error");
            original = Some(error.clone());
            Err(error)
        } else {
            Ok(())
        };
        runner.go(move || async move { result }).await;
        // Join before the next submission so the sequence of events is fixed
        let _ = runner.wait().await;
    }

    let errors = runner.wait().await;
    (runner, errors, original)
}

#[tokio::test]
async fn test_cancel_on_failure_skips_later_tasks() {
    let (runner, errors, original) = run_sequential_with_failure(Some(1)).await;
    let original = original.unwrap();

    assert_eq!(errors.len(), 7);
    assert_eq!(errors.iter().filter(|e| e.is_skip_marker()).count(), 6);
    assert_eq!(errors.iter().filter(|e| **e == original).count(), 1);
    assert_eq!(errors[0], original);
    assert_eq!(runner.failure_cause(), Some(original));
}

#[tokio::test]
async fn test_cancel_on_failure_first_task_fails() {
    let (_, errors, original) = run_sequential_with_failure(Some(0)).await;

    assert_eq!(errors.len(), 8);
    assert_eq!(errors[0], original.unwrap());
    assert!(errors[1..].iter().all(|e| *e == TaskError::Aborted));
}

#[tokio::test]
async fn test_cancel_on_failure_all_ok() {
    let (runner, errors, _) = run_sequential_with_failure(None).await;

    assert!(errors.is_empty());
    assert_eq!(runner.failure_cause(), None);
    assert!(!runner.signal().is_cancelled());
}

#[tokio::test]
async fn test_cancel_on_failure_leaves_parent_alone() {
    let parent = CancelSignal::new();
    let runner = Runner::new(&parent, RunnerConfig::default().with_cancel_on_failure(true));

    runner
        .go(|| async { Err::<(), _>(anyhow::anyhow!("broken")) })
        .await;
    let errors = runner.wait().await;

    assert_eq!(errors.len(), 1);
    assert!(runner.signal().is_cancelled());
    assert!(!parent.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_all_recorded() {
    let runner = Runner::new(
        &CancelSignal::new(),
        RunnerConfig::default().with_cancel_on_failure(true),
    );
    let barrier = Arc::new(Barrier::new(4));

    for i in 0..4 {
        let barrier = barrier.clone();
        runner
            .go(move || async move {
                // Everyone starts before anyone fails
                barrier.wait().await;
                Err::<(), _>(TaskError::msg(format!("failure {i}")))
            })
            .await;
    }

    let errors = runner.wait().await;
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().all(|e| e.as_failure().is_some()));

    let cause = runner.failure_cause().unwrap();
    assert!(errors.contains(&cause));
}

async fn run_with_parent_cancel(cancel_on_failure: bool, cancel_before: usize) -> Vec<TaskError> {
    let parent = CancelSignal::new();
    let runner = Runner::new(
        &parent,
        RunnerConfig::default().with_cancel_on_failure(cancel_on_failure),
    );

    for i in 0..8 {
        if i == cancel_before {
            // Everything submitted so far must have finished successfully
            let _ = runner.wait().await;
            parent.cancel();
        }
        runner.go(|| async { Ok::<_, TaskError>(()) }).await;
    }

    runner.wait().await
}

#[tokio::test]
async fn test_parent_cancellation_is_respected() {
    for cancel_on_failure in [false, true] {
        let errors = run_with_parent_cancel(cancel_on_failure, 0).await;
        assert_eq!(errors.len(), 8);
        assert!(errors.iter().all(|e| *e == TaskError::Cancelled));

        let errors = run_with_parent_cancel(cancel_on_failure, 2).await;
        assert_eq!(errors.len(), 6);
        assert!(errors.iter().all(|e| *e == TaskError::Cancelled));
    }
}

#[tokio::test]
async fn test_skip_after_parent_cancel_fires_failure_trigger() {
    let parent = CancelSignal::new();
    parent.cancel();

    let runner = Runner::new(&parent, RunnerConfig::default().with_cancel_on_failure(true));
    runner.go(|| async { Ok::<_, TaskError>(()) }).await;

    assert_eq!(runner.wait().await, vec![TaskError::Cancelled]);
    assert_eq!(runner.failure_cause(), Some(TaskError::Cancelled));
}

#[tokio::test]
async fn test_parent_cancelled_with_custom_cause_records_aborted() {
    for cancel_on_failure in [false, true] {
        let parent = CancelSignal::new();
        assert!(parent.cancel_with_cause(TaskError::msg("shutting down")));

        let runner = Runner::new(
            &parent,
            RunnerConfig::default().with_cancel_on_failure(cancel_on_failure),
        );
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let ran = ran.clone();
            runner
                .go(move || async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TaskError>(())
                })
                .await;
        }

        let errors = runner.wait().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(errors, vec![TaskError::Aborted; 4]);
    }
}

#[tokio::test]
async fn test_parent_deadline_is_reported() {
    let parent = CancelSignal::with_timeout(Duration::ZERO);

    for cancel_on_failure in [false, true] {
        let runner = Runner::new(
            &parent,
            RunnerConfig::default().with_cancel_on_failure(cancel_on_failure),
        );
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let ran = ran.clone();
            runner
                .go(move || async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TaskError>(())
                })
                .await;
        }

        let errors = runner.wait().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(errors, vec![TaskError::DeadlineExceeded; 3]);
    }
}

#[tokio::test]
async fn test_cancellation_does_not_interrupt_running_tasks() {
    let parent = CancelSignal::new();
    let runner = Runner::new(&parent, RunnerConfig::default());
    let (started_tx, started_rx) = oneshot::channel::<()>();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let finished = Arc::new(AtomicUsize::new(0));

    let counter = finished.clone();
    runner
        .go(move || async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TaskError>(())
        })
        .await;

    started_rx.await.unwrap();
    parent.cancel();
    release_tx.send(()).unwrap();

    assert!(runner.wait().await.is_empty());
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wait_is_idempotent() {
    let runner = Runner::new(&CancelSignal::new(), RunnerConfig::default().with_limit(2));

    for i in 0..6 {
        runner
            .go(move || async move {
                if i % 2 == 0 {
                    Err(TaskError::msg(format!("even task {i}")))
                } else {
                    Ok(())
                }
            })
            .await;
    }

    let first = runner.wait().await;
    let second = runner.wait().await;
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);

    // Later submissions extend, never reset, the collection
    runner
        .go(|| async { Err::<(), _>(TaskError::msg("late")) })
        .await;
    let third = runner.wait().await;
    assert_eq!(third.len(), 4);
    assert_eq!(&third[..3], &first[..]);
}

#[tokio::test]
async fn test_panicking_task_is_recorded_and_cleaned_up() {
    let runner = Runner::new(&CancelSignal::new(), RunnerConfig::default().with_limit(1));

    runner
        .go(|| async {
            if true {
                panic!("task blew up");
            }
            Ok::<_, TaskError>(())
        })
        .await;

    // The slot must have been released for this one to be admitted
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    tokio::time::timeout(
        Duration::from_secs(1),
        runner.go(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TaskError>(())
        }),
    )
    .await
    .expect("panicking task should release its slot");

    let errors = runner.wait().await;
    assert_eq!(errors, vec![TaskError::Panicked("task blew up".into())]);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(runner.in_flight(), 0);
}

#[tokio::test]
async fn test_panic_triggers_cancel_on_failure() {
    let runner = Runner::new(
        &CancelSignal::new(),
        RunnerConfig::default().with_cancel_on_failure(true),
    );

    runner
        .go_blocking(|| -> Result<(), TaskError> { panic!("blocking panic") })
        .await;
    let _ = runner.wait().await;
    runner.go(|| async { Ok::<_, TaskError>(()) }).await;

    let errors = runner.wait().await;
    assert_eq!(
        errors,
        vec![
            TaskError::Panicked("blocking panic".into()),
            TaskError::Aborted
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_go_blocking_runs_sync_closures() {
    let runner = Runner::new(&CancelSignal::new(), RunnerConfig::default().with_limit(4));
    let total = Arc::new(AtomicUsize::new(0));

    for i in 0..10usize {
        let total = total.clone();
        runner
            .go_blocking(move || {
                std::thread::sleep(Duration::from_millis(5));
                total.fetch_add(i, Ordering::SeqCst);
                if i == 9 {
                    anyhow::bail!("task {i} rejected");
                }
                Ok(())
            })
            .await;
    }

    let errors = runner.wait().await;
    assert_eq!(total.load(Ordering::SeqCst), (0..10).sum::<usize>());
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].to_string(), "task 9 rejected");
}

#[tokio::test]
async fn test_signal_lets_tasks_stop_early() {
    let parent = CancelSignal::new();
    let runner = Runner::new(&parent, RunnerConfig::default());
    let signal = runner.signal();

    runner
        .go(move || async move {
            signal.cancelled().await;
            Err::<(), _>(signal.cause().unwrap_or(TaskError::Cancelled))
        })
        .await;

    parent.cancel();
    let errors = runner.wait().await;
    assert_eq!(errors, vec![TaskError::Cancelled]);
}
