//! The worker pool proper.

use crate::config::WorkerPoolConfig;
use crate::error::PoolError;
use crate::events::PoolEvent;
use crate::handle::TaskHandle;
use crate::queue::{ErasedRun, QueuedTask, TaskOutcome, TaskQueue};
use crate::task::{TaskId, TaskKind, TaskSpec};
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use xypriss_core::ServerError;

/// Point-in-time pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub cpu_workers: usize,
    pub io_workers: usize,
    /// Tasks currently executing across both lanes.
    pub active: usize,
    /// Tasks waiting across both lanes.
    pub queued: usize,
    pub total_executed: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    /// Exponentially weighted average execution time of finished tasks.
    pub avg_execution_time: Duration,
}

struct LaneState {
    queue: Mutex<TaskQueue>,
    notify: Notify,
    min: usize,
    max: usize,
    spawned: AtomicUsize,
    active: AtomicUsize,
}

impl LaneState {
    fn new(min: usize, max: usize) -> Self {
        Self {
            queue: Mutex::new(TaskQueue::new()),
            notify: Notify::new(),
            min,
            max,
            spawned: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        }
    }
}

struct PoolInner {
    config: WorkerPoolConfig,
    cpu: LaneState,
    io: LaneState,
    next_seq: AtomicU64,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    total_executed: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    cancellations: AtomicU64,
    avg_exec_micros: Mutex<f64>,
}

impl PoolInner {
    fn lane(&self, kind: TaskKind) -> &LaneState {
        match kind {
            TaskKind::Cpu => &self.cpu,
            TaskKind::Io => &self.io,
        }
    }

    fn record_outcome(&self, id: TaskId, outcome: TaskOutcome, duration: Duration) {
        self.total_executed.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let event = match outcome {
            TaskOutcome::Success => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                PoolEvent::TaskCompleted {
                    pool_name: self.config.name.clone(),
                    timestamp: now,
                    task: id,
                    duration,
                }
            }
            TaskOutcome::Failure => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                PoolEvent::TaskFailed {
                    pool_name: self.config.name.clone(),
                    timestamp: now,
                    task: id,
                }
            }
            TaskOutcome::Timeout => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                PoolEvent::TaskTimedOut {
                    pool_name: self.config.name.clone(),
                    timestamp: now,
                    task: id,
                }
            }
            TaskOutcome::Cancelled => {
                self.cancellations.fetch_add(1, Ordering::Relaxed);
                PoolEvent::TaskCancelled {
                    pool_name: self.config.name.clone(),
                    timestamp: now,
                    task: id,
                }
            }
        };

        {
            let mut avg = self.avg_exec_micros.lock();
            let sample = duration.as_micros() as f64;
            *avg = if *avg == 0.0 {
                sample
            } else {
                *avg * 0.8 + sample * 0.2
            };
        }

        self.config.event_listeners.emit(&event);

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "xypriss_pool_tasks_executed_total",
            "pool" => self.config.name.clone(),
            "outcome" => match outcome {
                TaskOutcome::Success => "success",
                TaskOutcome::Failure => "failure",
                TaskOutcome::Timeout => "timeout",
                TaskOutcome::Cancelled => "cancelled",
            }
        )
        .increment(1);
    }
}

/// Two-lane worker pool. Cloning shares the pool.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl Clone for WorkerPool {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let cpu = LaneState::new(config.cpu.min, config.cpu.max);
        let io = LaneState::new(config.io.min, config.io.max);
        let pool = Self {
            inner: Arc::new(PoolInner {
                config,
                cpu,
                io,
                next_seq: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                workers: Mutex::new(Vec::new()),
                total_executed: AtomicU64::new(0),
                successes: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
                cancellations: AtomicU64::new(0),
                avg_exec_micros: Mutex::new(0.0),
            }),
        };
        for kind in [TaskKind::Cpu, TaskKind::Io] {
            let lane = pool.inner.lane(kind);
            for _ in 0..lane.min {
                pool.spawn_worker(kind);
            }
        }
        pool
    }

    /// Submits a CPU-bound closure. It runs on the blocking thread pool and
    /// should poll the cancellation token at convenient points.
    pub fn submit_cpu<T, F>(&self, spec: TaskSpec, f: F) -> Result<TaskHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> Result<T, ServerError> + Send + 'static,
    {
        let (id, cancel, deadline, tx, rx) = self.admit::<T>(TaskKind::Cpu, &spec)?;
        let worker_cancel = cancel.clone();

        let run: ErasedRun = Box::new(move || {
            Box::pin(async move {
                // Queued-state checks: an already-elapsed deadline wins over
                // an already-requested cancel.
                if deadline.is_some_and(|at| tokio::time::Instant::now() >= at) {
                    let _ = tx.send(Err(PoolError::Timeout));
                    return TaskOutcome::Timeout;
                }
                if worker_cancel.is_cancelled() {
                    let _ = tx.send(Err(PoolError::Cancelled));
                    return TaskOutcome::Cancelled;
                }
                let closure_cancel = worker_cancel.clone();
                let work = tokio::task::spawn_blocking(move || f(&closure_cancel));
                let timed = async {
                    match deadline {
                        Some(at) => {
                            match tokio::time::timeout_at(at, work).await {
                                Ok(joined) => Some(joined),
                                Err(_) => None,
                            }
                        }
                        None => Some(work.await),
                    }
                };
                tokio::select! {
                    biased;
                    joined = timed => match joined {
                        None => {
                            // Let the blocking closure wind down on its own.
                            worker_cancel.cancel();
                            let _ = tx.send(Err(PoolError::Timeout));
                            TaskOutcome::Timeout
                        }
                        Some(Ok(Ok(value))) => {
                            let _ = tx.send(Ok(value));
                            TaskOutcome::Success
                        }
                        Some(Ok(Err(err))) => {
                            let _ = tx.send(Err(PoolError::HandlerError(err.to_string())));
                            TaskOutcome::Failure
                        }
                        Some(Err(_join)) => {
                            let _ = tx.send(Err(PoolError::HandlerError(
                                "task panicked".to_string(),
                            )));
                            TaskOutcome::Failure
                        }
                    },
                    _ = worker_cancel.cancelled() => {
                        let _ = tx.send(Err(PoolError::Cancelled));
                        TaskOutcome::Cancelled
                    }
                }
            })
        });

        self.enqueue(TaskKind::Cpu, spec, id, run);
        Ok(TaskHandle::new(id, cancel, rx))
    }

    /// Submits an I/O-bound future. It runs on the async runtime, bounded
    /// by the IO lane's concurrency, and is dropped on cancellation or
    /// deadline expiry.
    pub fn submit_io<T, F, Fut>(&self, spec: TaskSpec, f: F) -> Result<TaskHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ServerError>> + Send + 'static,
    {
        let (id, cancel, deadline, tx, rx) = self.admit::<T>(TaskKind::Io, &spec)?;
        let worker_cancel = cancel.clone();

        let run: ErasedRun = Box::new(move || {
            Box::pin(async move {
                if deadline.is_some_and(|at| tokio::time::Instant::now() >= at) {
                    let _ = tx.send(Err(PoolError::Timeout));
                    return TaskOutcome::Timeout;
                }
                if worker_cancel.is_cancelled() {
                    let _ = tx.send(Err(PoolError::Cancelled));
                    return TaskOutcome::Cancelled;
                }
                let work = std::panic::AssertUnwindSafe(f(worker_cancel.clone())).catch_unwind();
                let timed = async {
                    match deadline {
                        Some(at) => match tokio::time::timeout_at(at, work).await {
                            Ok(result) => Some(result),
                            Err(_) => None,
                        },
                        None => Some(work.await),
                    }
                };
                tokio::select! {
                    biased;
                    result = timed => match result {
                        None => {
                            let _ = tx.send(Err(PoolError::Timeout));
                            TaskOutcome::Timeout
                        }
                        Some(Ok(Ok(value))) => {
                            let _ = tx.send(Ok(value));
                            TaskOutcome::Success
                        }
                        Some(Ok(Err(err))) => {
                            let _ = tx.send(Err(PoolError::HandlerError(err.to_string())));
                            TaskOutcome::Failure
                        }
                        Some(Err(_panic)) => {
                            let _ = tx.send(Err(PoolError::HandlerError(
                                "task panicked".to_string(),
                            )));
                            TaskOutcome::Failure
                        }
                    },
                    _ = worker_cancel.cancelled() => {
                        let _ = tx.send(Err(PoolError::Cancelled));
                        TaskOutcome::Cancelled
                    }
                }
            })
        });

        self.enqueue(TaskKind::Io, spec, id, run);
        Ok(TaskHandle::new(id, cancel, rx))
    }

    /// Admission control shared by both lanes: shutdown gate, backpressure
    /// gate, id and channel allocation.
    #[allow(clippy::type_complexity)]
    fn admit<T>(
        &self,
        kind: TaskKind,
        spec: &TaskSpec,
    ) -> Result<
        (
            TaskId,
            CancellationToken,
            Option<tokio::time::Instant>,
            oneshot::Sender<Result<T, PoolError>>,
            oneshot::Receiver<Result<T, PoolError>>,
        ),
        PoolError,
    > {
        if self.inner.shutdown.is_cancelled() {
            self.reject(kind);
            return Err(PoolError::PoolShuttingDown);
        }
        let lane = self.inner.lane(kind);
        let queued = lane.queue.lock().len();
        if queued >= self.inner.config.max_queued_tasks {
            self.reject(kind);
            return Err(PoolError::QueueSaturated {
                queued,
                high_water: self.inner.config.max_queued_tasks,
            });
        }

        let id = TaskId(self.inner.next_seq.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let deadline = spec
            .deadline
            .or(self.inner.config.default_deadline)
            .map(|d| tokio::time::Instant::now() + d);
        let (tx, rx) = oneshot::channel();
        Ok((id, cancel, deadline, tx, rx))
    }

    fn enqueue(&self, kind: TaskKind, spec: TaskSpec, id: TaskId, run: ErasedRun) {
        let lane = self.inner.lane(kind);
        {
            let mut queue = lane.queue.lock();
            queue.push(QueuedTask {
                seq: id.0,
                priority: spec.priority,
                submitted_at: Instant::now(),
                run,
            });
        }
        lane.notify.notify_one();

        // Scale the lane up to its bound while work is waiting.
        let spawned = lane.spawned.load(Ordering::Acquire);
        if spawned < lane.max && !lane.queue.lock().is_empty() {
            self.spawn_worker(kind);
        }
    }

    fn reject(&self, kind: TaskKind) {
        self.inner
            .config
            .event_listeners
            .emit(&PoolEvent::SubmissionRejected {
                pool_name: self.inner.config.name.clone(),
                timestamp: Instant::now(),
                kind,
            });
    }

    fn spawn_worker(&self, kind: TaskKind) {
        let lane = self.inner.lane(kind);
        if lane.spawned.fetch_add(1, Ordering::AcqRel) >= lane.max {
            lane.spawned.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(worker_loop(inner, kind));
        self.inner.workers.lock().push(handle);
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        PoolStats {
            cpu_workers: inner.cpu.spawned.load(Ordering::Relaxed),
            io_workers: inner.io.spawned.load(Ordering::Relaxed),
            active: inner.cpu.active.load(Ordering::Relaxed)
                + inner.io.active.load(Ordering::Relaxed),
            queued: inner.cpu.queue.lock().len() + inner.io.queue.lock().len(),
            total_executed: inner.total_executed.load(Ordering::Relaxed),
            successes: inner.successes.load(Ordering::Relaxed),
            failures: inner.failures.load(Ordering::Relaxed),
            timeouts: inner.timeouts.load(Ordering::Relaxed),
            cancellations: inner.cancellations.load(Ordering::Relaxed),
            avg_execution_time: Duration::from_micros(*inner.avg_exec_micros.lock() as u64),
        }
    }

    /// Stops accepting submissions, drains the queues, and waits for the
    /// workers up to `timeout`. Workers still running afterwards are
    /// aborted; their tasks resolve as `PoolShuttingDown`.
    pub async fn shutdown(&self, timeout: Duration) {
        self.inner.shutdown.cancel();
        self.inner.cpu.notify.notify_waiters();
        self.inner.io.notify.notify_waiters();

        let mut workers: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        let deadline = tokio::time::Instant::now() + timeout;
        for worker in &mut workers {
            if tokio::time::timeout_at(deadline, &mut *worker).await.is_err() {
                worker.abort();
            }
        }
    }
}

async fn worker_loop(inner: Arc<PoolInner>, kind: TaskKind) {
    let lane = inner.lane(kind);
    loop {
        let task = lane.queue.lock().pop();
        let Some(task) = task else {
            if inner.shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = lane.notify.notified() => {}
                _ = inner.shutdown.cancelled() => {}
            }
            continue;
        };

        lane.active.fetch_add(1, Ordering::AcqRel);
        let id = TaskId(task.seq);
        let queued_for = task.submitted_at.elapsed();
        #[cfg(feature = "tracing")]
        tracing::trace!(task = %id, ?queued_for, "task dequeued");
        #[cfg(not(feature = "tracing"))]
        let _ = queued_for;
        let started = Instant::now();
        let outcome = std::panic::AssertUnwindSafe((task.run)())
            .catch_unwind()
            .await
            .unwrap_or(TaskOutcome::Failure);
        inner.record_outcome(id, outcome, started.elapsed());
        lane.active.fetch_sub(1, Ordering::AcqRel);
    }
}
