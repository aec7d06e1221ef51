//! Worker pool configuration.

use crate::events::PoolEvent;
use std::time::Duration;
use xypriss_core::events::{EventListeners, FnListener};

/// Sizing of one lane (CPU or IO).
#[derive(Debug, Clone, Copy)]
pub struct LaneConfig {
    /// Workers started eagerly.
    pub min: usize,
    /// Concurrency bound; additional workers are started on demand up to
    /// this many.
    pub max: usize,
}

impl LaneConfig {
    pub fn new(min: usize, max: usize) -> Self {
        let min = min.max(1);
        Self {
            min,
            max: max.max(min),
        }
    }
}

/// Configuration for a [`crate::WorkerPool`].
pub struct WorkerPoolConfig {
    pub(crate) name: String,
    pub(crate) cpu: LaneConfig,
    pub(crate) io: LaneConfig,
    pub(crate) max_queued_tasks: usize,
    pub(crate) default_deadline: Option<Duration>,
    pub(crate) event_listeners: EventListeners<PoolEvent>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WorkerPoolConfig {
    pub fn builder() -> WorkerPoolConfigBuilder {
        WorkerPoolConfigBuilder::new()
    }
}

/// Builder for [`WorkerPoolConfig`].
pub struct WorkerPoolConfigBuilder {
    name: String,
    cpu: LaneConfig,
    io: LaneConfig,
    max_queued_tasks: usize,
    default_deadline: Option<Duration>,
    event_listeners: EventListeners<PoolEvent>,
}

impl WorkerPoolConfigBuilder {
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            cpu: LaneConfig::new(1, 4),
            io: LaneConfig::new(2, 8),
            max_queued_tasks: 1024,
            default_deadline: Some(Duration::from_secs(30)),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the pool name for observability.
    ///
    /// Default: `"<unnamed>"`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sizes the CPU lane.
    ///
    /// Default: min 1, max 4
    pub fn cpu(mut self, min: usize, max: usize) -> Self {
        self.cpu = LaneConfig::new(min, max);
        self
    }

    /// Sizes the IO lane.
    ///
    /// Default: min 2, max 8
    pub fn io(mut self, min: usize, max: usize) -> Self {
        self.io = LaneConfig::new(min, max);
        self
    }

    /// High-water mark per lane queue; submissions beyond it are rejected
    /// with `QueueSaturated`.
    ///
    /// Default: 1024
    pub fn max_queued_tasks(mut self, max: usize) -> Self {
        self.max_queued_tasks = max.max(1);
        self
    }

    /// Deadline applied to tasks submitted without one. `None` lets such
    /// tasks run unbounded.
    ///
    /// Default: 30 s
    pub fn default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Registers a callback for rejected submissions.
    pub fn on_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(crate::TaskKind) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let PoolEvent::SubmissionRejected { kind, .. } = event {
                f(*kind);
            }
        }));
        self
    }

    /// Registers a callback for task timeouts.
    pub fn on_timeout<F>(mut self, f: F) -> Self
    where
        F: Fn(crate::TaskId) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let PoolEvent::TaskTimedOut { task, .. } = event {
                f(*task);
            }
        }));
        self
    }

    /// Registers a raw event listener.
    pub fn event_listener<L>(mut self, listener: L) -> Self
    where
        L: xypriss_core::events::EventListener<PoolEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    pub fn build(self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            name: self.name,
            cpu: self.cpu,
            io: self.io,
            max_queued_tasks: self.max_queued_tasks,
            default_deadline: self.default_deadline,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for WorkerPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
