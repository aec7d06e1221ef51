//! Worker pool events.

use crate::task::{TaskId, TaskKind};
use std::time::{Duration, Instant};
use xypriss_core::events::ServerEvent;

/// Events emitted by the worker pool.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A submission was rejected by backpressure or shutdown.
    SubmissionRejected {
        pool_name: String,
        timestamp: Instant,
        kind: TaskKind,
    },
    /// A task finished successfully.
    TaskCompleted {
        pool_name: String,
        timestamp: Instant,
        task: TaskId,
        duration: Duration,
    },
    /// A task failed or panicked.
    TaskFailed {
        pool_name: String,
        timestamp: Instant,
        task: TaskId,
    },
    /// A task missed its deadline.
    TaskTimedOut {
        pool_name: String,
        timestamp: Instant,
        task: TaskId,
    },
    /// A task was cancelled through its handle.
    TaskCancelled {
        pool_name: String,
        timestamp: Instant,
        task: TaskId,
    },
}

impl ServerEvent for PoolEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PoolEvent::SubmissionRejected { .. } => "submission_rejected",
            PoolEvent::TaskCompleted { .. } => "task_completed",
            PoolEvent::TaskFailed { .. } => "task_failed",
            PoolEvent::TaskTimedOut { .. } => "task_timed_out",
            PoolEvent::TaskCancelled { .. } => "task_cancelled",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            PoolEvent::SubmissionRejected { timestamp, .. }
            | PoolEvent::TaskCompleted { timestamp, .. }
            | PoolEvent::TaskFailed { timestamp, .. }
            | PoolEvent::TaskTimedOut { timestamp, .. }
            | PoolEvent::TaskCancelled { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            PoolEvent::SubmissionRejected { pool_name, .. }
            | PoolEvent::TaskCompleted { pool_name, .. }
            | PoolEvent::TaskFailed { pool_name, .. }
            | PoolEvent::TaskTimedOut { pool_name, .. }
            | PoolEvent::TaskCancelled { pool_name, .. } => pool_name,
        }
    }
}
