//! Execution queue - admission control for execution tasks
//!
//! At most `max_concurrent` tasks run at once; the rest wait in a FIFO. A slot
//! is claimed (the running counter incremented) under the same lock that
//! checks capacity, before the task is spawned, so the bound can never be
//! overshot. Each task settles its completion channel exactly once.

use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::QueueError;
use crate::result::ExecutionResult;

/// Poll interval used by `drain`
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<ExecutionResult>> + Send>>;
type BoxedTask = Box<dyn FnOnce() -> TaskFuture + Send>;
type Completion = oneshot::Sender<Result<ExecutionResult, QueueError>>;

/// Caller-supplied context, used only for logging
#[derive(Debug, Clone, Default)]
pub struct TaskMetadata {
    pub language: String,
    pub user_id: Option<String>,
}

impl TaskMetadata {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

struct QueuedTask {
    id: Uuid,
    task: BoxedTask,
    metadata: TaskMetadata,
    enqueued_at: Instant,
    completion: Completion,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedTask>,
    running: usize,
    admitted: u64,
    completed: u64,
    failed: u64,
    avg_wait_ms: f64,
    avg_execution_ms: f64,
}

impl QueueState {
    fn total_processed(&self) -> u64 {
        self.completed + self.failed
    }
}

/// Point-in-time view of queue occupancy
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub running: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub available_slots: usize,
    pub utilization_percent: f64,
}

/// Cumulative queue statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_processed: u64,
    pub currently_running: usize,
    pub queued_count: usize,
    pub completed: u64,
    pub failed: u64,
    pub avg_wait_time_ms: f64,
    pub avg_execution_time_ms: f64,
    pub max_concurrent: usize,
    pub utilization_percent: f64,
}

struct Inner {
    max_concurrent: usize,
    state: Mutex<QueueState>,
}

/// Bounded-concurrency FIFO of execution tasks. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionQueue {
    inner: Arc<Inner>,
}

impl ExecutionQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `task` and admit it as soon as a slot is free.
    ///
    /// The task is registered immediately; the returned future only waits for
    /// its outcome. An `Err` from the task or a panic inside it rejects with
    /// `QueueError::InfraFailure`. Must be called from within a Tokio runtime.
    pub fn enqueue<F, Fut>(
        &self,
        task: F,
        metadata: TaskMetadata,
    ) -> impl Future<Output = Result<ExecutionResult, QueueError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<ExecutionResult>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();

        let queued = {
            let mut state = self.state();
            state.pending.push_back(QueuedTask {
                id,
                task: Box::new(move || Box::pin(task()) as TaskFuture),
                metadata,
                enqueued_at: Instant::now(),
                completion: tx,
            });
            state.pending.len()
        };
        debug!(task_id = %id, queued, "Task enqueued");

        self.pump();

        async move {
            rx.await.unwrap_or_else(|_| {
                Err(QueueError::InfraFailure(
                    "task dropped without completing".to_string(),
                ))
            })
        }
    }

    /// Admit pending tasks while there is free capacity
    fn pump(&self) {
        loop {
            let next = {
                let mut state = self.state();
                if state.running >= self.inner.max_concurrent {
                    break;
                }
                let Some(item) = state.pending.pop_front() else {
                    break;
                };
                state.running += 1;

                let wait_ms = item.enqueued_at.elapsed().as_secs_f64() * 1000.0;
                state.admitted += 1;
                state.avg_wait_ms = rolling_mean(state.avg_wait_ms, wait_ms, state.admitted);
                (item, wait_ms)
            };
            self.launch(next.0, next.1);
        }
    }

    fn launch(&self, item: QueuedTask, wait_ms: f64) {
        let QueuedTask {
            id,
            task,
            metadata,
            completion,
            ..
        } = item;

        info!(
            task_id = %id,
            language = %metadata.language,
            user = metadata.user_id.as_deref().unwrap_or("-"),
            wait_ms = wait_ms as u64,
            "Task admitted"
        );

        let queue = self.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            // The inner spawn turns a panic in the task into a JoinError
            let outcome = match tokio::spawn(async move { task().await }).await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(e)) => Err(QueueError::InfraFailure(format!("{:#}", e))),
                Err(join_err) => Err(QueueError::InfraFailure(join_err.to_string())),
            };
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            match &outcome {
                Ok(result) => info!(
                    task_id = %id,
                    language = %metadata.language,
                    status = %result.status.description,
                    elapsed_ms = elapsed_ms as u64,
                    "Task completed"
                ),
                Err(e) => error!(
                    task_id = %id,
                    language = %metadata.language,
                    "Task failed: {}", e
                ),
            }

            queue.finish(outcome.is_ok(), elapsed_ms);
            // The caller may have stopped waiting
            let _ = completion.send(outcome);
            queue.pump();
        });
    }

    fn finish(&self, ok: bool, elapsed_ms: f64) {
        let mut state = self.state();
        if ok {
            state.completed += 1;
        } else {
            state.failed += 1;
        }
        let processed = state.total_processed();
        state.avg_execution_ms = rolling_mean(state.avg_execution_ms, elapsed_ms, processed);
        state.running = state.running.saturating_sub(1);
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.state();
        let max = self.inner.max_concurrent;
        QueueStatus {
            running: state.running,
            queued: state.pending.len(),
            max_concurrent: max,
            available_slots: max.saturating_sub(state.running),
            utilization_percent: utilization(state.running, max),
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state();
        let max = self.inner.max_concurrent;
        QueueStats {
            total_processed: state.total_processed(),
            currently_running: state.running,
            queued_count: state.pending.len(),
            completed: state.completed,
            failed: state.failed,
            avg_wait_time_ms: state.avg_wait_ms,
            avg_execution_time_ms: state.avg_execution_ms,
            max_concurrent: max,
            utilization_percent: utilization(state.running, max),
        }
    }

    /// Reject every task that has not started yet. Running tasks are untouched.
    ///
    /// Returns how many tasks were rejected.
    pub fn clear(&self) -> usize {
        let cleared: Vec<QueuedTask> = {
            let mut state = self.state();
            state.pending.drain(..).collect()
        };
        let count = cleared.len();
        for item in cleared {
            let _ = item.completion.send(Err(QueueError::Cleared));
        }
        info!("Cleared {} pending tasks", count);
        count
    }

    /// Wait until nothing is running and nothing is queued
    pub async fn drain(&self) {
        loop {
            let status = self.status();
            if status.running == 0 && status.queued == 0 {
                return;
            }
            debug!(
                running = status.running,
                queued = status.queued,
                "Waiting for queue to drain"
            );
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

fn rolling_mean(current: f64, sample: f64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    current + (sample - current) / count as f64
}

fn utilization(running: usize, max: usize) -> f64 {
    if max == 0 {
        return 0.0;
    }
    running as f64 / max as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ExecutionMode, ExecutionStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok_result(tag: &str) -> ExecutionResult {
        ExecutionResult {
            success: true,
            status: ExecutionStatus::new(3, "Accepted"),
            stdout: tag.to_string(),
            stderr: String::new(),
            compile_output: String::new(),
            time: None,
            memory: None,
            execution_time: 0,
            language: "python".into(),
            language_id: Some(71),
            token: None,
            mode: ExecutionMode::Local,
        }
    }

    /// Tracks how many probe tasks are inside their critical section
    #[derive(Clone, Default)]
    struct ConcurrencyProbe {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl ConcurrencyProbe {
        fn task(&self, sleep: Duration) -> impl FnOnce() -> TaskFuture + Send + 'static {
            let probe = self.clone();
            move || -> TaskFuture {
                Box::pin(async move {
                    let now = probe.current.fetch_add(1, Ordering::SeqCst) + 1;
                    probe.peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(sleep).await;
                    probe.current.fetch_sub(1, Ordering::SeqCst);
                    Ok(ok_result("probe"))
                })
            }
        }
    }

    #[tokio::test]
    async fn test_k_running_and_rest_queued() {
        let queue = ExecutionQueue::new(2);
        let probe = ConcurrencyProbe::default();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                queue.enqueue(
                    probe.task(Duration::from_millis(50)),
                    TaskMetadata::new("python"),
                )
            })
            .collect();

        let status = queue.status();
        assert_eq!(status.running, 2);
        assert_eq!(status.queued, 3);
        assert_eq!(status.available_slots, 0);
        assert_eq!(status.utilization_percent, 100.0);

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(probe.peak.load(Ordering::SeqCst) <= 2);

        let stats = queue.stats();
        assert_eq!(stats.total_processed, 5);
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.currently_running, 0);
        assert_eq!(stats.queued_count, 0);
        assert!(stats.avg_execution_time_ms > 0.0);
    }

    #[tokio::test]
    async fn test_wall_time_matches_batches() {
        let queue = ExecutionQueue::new(2);
        let probe = ConcurrencyProbe::default();

        let started = Instant::now();
        let handles: Vec<_> = (0..5)
            .map(|_| {
                queue.enqueue(
                    probe.task(Duration::from_millis(100)),
                    TaskMetadata::new("python"),
                )
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        let elapsed = started.elapsed();

        // ceil(5 / 2) * 100ms
        assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(450), "{:?}", elapsed);
        assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_running_never_exceeds_capacity() {
        let queue = ExecutionQueue::new(3);
        let probe = ConcurrencyProbe::default();

        let handles: Vec<_> = (0..30)
            .map(|i| {
                queue.enqueue(
                    probe.task(Duration::from_millis(5 + (i % 4) * 5)),
                    TaskMetadata::new("cpp"),
                )
            })
            .collect();

        for _ in 0..10 {
            assert!(queue.status().running <= 3);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(probe.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(queue.stats().completed, 30);
    }

    #[tokio::test]
    async fn test_fifo_admission_order() {
        let queue = ExecutionQueue::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let order = order.clone();
                // Later tasks finish faster, so completion order differs
                let sleep = Duration::from_millis(30 - i * 5);
                queue.enqueue(
                    move || async move {
                        order.lock().unwrap().push(i);
                        tokio::time::sleep(sleep).await;
                        Ok(ok_result(&i.to_string()))
                    },
                    TaskMetadata::new("python"),
                )
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_fifo_admission_with_parallel_slots() {
        let queue = ExecutionQueue::new(2);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..6u64)
            .map(|i| {
                let order = order.clone();
                queue.enqueue(
                    move || async move {
                        order.lock().unwrap().push(i);
                        tokio::time::sleep(Duration::from_millis(10 * (i % 3 + 1))).await;
                        Ok(ok_result("x"))
                    },
                    TaskMetadata::new("python"),
                )
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_failed_program_counts_as_completed() {
        let queue = ExecutionQueue::new(1);
        let result = queue
            .enqueue(
                || async {
                    let mut result = ok_result("");
                    result.success = false;
                    result.status = ExecutionStatus::new(-1, "Runtime Error");
                    Ok(result)
                },
                TaskMetadata::new("python"),
            )
            .await
            .unwrap();

        assert!(!result.success);
        let stats = queue.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_task_error_rejects_and_counts_failed() {
        let queue = ExecutionQueue::new(1);
        let err = queue
            .enqueue(
                || async { Err(anyhow::anyhow!("worker crashed")) },
                TaskMetadata::new("python").with_user("alice"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::InfraFailure(ref msg) if msg.contains("worker crashed")));
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.currently_running, 0);
    }

    #[tokio::test]
    async fn test_panicking_task_frees_its_slot() {
        let queue = ExecutionQueue::new(1);
        let first = queue.enqueue(
            || async {
                if true {
                    panic!("boom");
                }
                Ok(ok_result("never"))
            },
            TaskMetadata::new("python"),
        );
        let second = queue.enqueue(|| async { Ok(ok_result("second")) }, TaskMetadata::new("python"));

        assert!(matches!(first.await, Err(QueueError::InfraFailure(_))));
        assert_eq!(second.await.unwrap().stdout, "second");
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_clear_rejects_pending_only() {
        let queue = ExecutionQueue::new(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let running = queue.enqueue(
            move || async move {
                let _ = release_rx.await;
                Ok(ok_result("running"))
            },
            TaskMetadata::new("python"),
        );
        let pending: Vec<_> = (0..3)
            .map(|_| queue.enqueue(|| async { Ok(ok_result("pending")) }, TaskMetadata::new("python")))
            .collect();

        assert_eq!(queue.status().queued, 3);
        assert_eq!(queue.clear(), 3);
        assert_eq!(queue.status().queued, 0);
        assert_eq!(queue.status().running, 1);

        for handle in pending {
            let err = handle.await.unwrap_err();
            assert!(matches!(err, QueueError::Cleared));
            assert_eq!(err.to_string(), "queue cleared");
        }

        release_tx.send(()).unwrap();
        assert_eq!(running.await.unwrap().stdout, "running");
    }

    #[tokio::test]
    async fn test_drain_waits_for_everything() {
        let queue = ExecutionQueue::new(2);
        let probe = ConcurrencyProbe::default();
        for _ in 0..4 {
            // Results are dropped; drain alone must observe completion
            let _ = queue.enqueue(
                probe.task(Duration::from_millis(20)),
                TaskMetadata::new("python"),
            );
        }

        queue.drain().await;
        let stats = queue.stats();
        assert_eq!(stats.completed, 4);
        assert_eq!(stats.currently_running, 0);
        assert_eq!(stats.queued_count, 0);
    }

    #[tokio::test]
    async fn test_drain_on_idle_queue_returns_immediately() {
        let queue = ExecutionQueue::new(1);
        tokio::time::timeout(Duration::from_millis(50), queue.drain())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_time_is_tracked() {
        let queue = ExecutionQueue::new(1);
        let probe = ConcurrencyProbe::default();
        let a = queue.enqueue(probe.task(Duration::from_millis(40)), TaskMetadata::new("c"));
        let b = queue.enqueue(probe.task(Duration::from_millis(1)), TaskMetadata::new("c"));
        a.await.unwrap();
        b.await.unwrap();

        // Second task waited ~40ms, first ~0ms
        assert!(queue.stats().avg_wait_time_ms >= 15.0);
    }

    #[test]
    fn test_rolling_mean() {
        let mut avg = 0.0;
        for (i, sample) in [10.0, 20.0, 30.0].iter().enumerate() {
            avg = rolling_mean(avg, *sample, i as u64 + 1);
        }
        assert!((avg - 20.0).abs() < 1e-9);
        assert_eq!(rolling_mean(5.0, 1.0, 0), 0.0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ExecutionQueue::new(0).max_concurrent(), 1);
    }
}
