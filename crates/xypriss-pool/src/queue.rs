//! The per-lane priority queue.

use crate::task::TaskPriority;
use futures::future::BoxFuture;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// How a finished task should be counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

/// The type-erased execution step. Result delivery to the submitter happens
/// inside; the worker only learns the outcome for accounting.
pub(crate) type ErasedRun = Box<dyn FnOnce() -> BoxFuture<'static, TaskOutcome> + Send>;

/// A task waiting in the queue.
pub(crate) struct QueuedTask {
    pub(crate) seq: u64,
    pub(crate) priority: TaskPriority,
    pub(crate) submitted_at: Instant,
    pub(crate) run: ErasedRun,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    /// Max-heap order: higher priority first, then earlier submission.
    /// The sequence number is assigned in submission order, so it is both
    /// the stable tie-break and a proxy for `submitted_at`.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue ordered by `(priority desc, submission asc)`.
#[derive(Default)]
pub(crate) struct TaskQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub(crate) fn push(&mut self, task: QueuedTask) {
        self.heap.push(task);
    }

    pub(crate) fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
