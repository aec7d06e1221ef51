//! Task identity, kinds, priorities, and submission options.

use std::time::Duration;

/// Which lane a task runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// CPU-bound closure, executed on the blocking thread pool.
    Cpu,
    /// I/O-bound future, executed on the async runtime.
    Io,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Cpu => "cpu",
            TaskKind::Io => "io",
        }
    }
}

/// Scheduling priority. Higher priorities start first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Identifier of a submitted task, unique within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Submission options for a task.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub(crate) priority: TaskPriority,
    pub(crate) deadline: Option<Duration>,
}

impl TaskSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduling priority. Default: [`TaskPriority::Normal`].
    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Relative deadline measured from submission. A task that has not
    /// completed by then resolves as `Timeout`. Default: none.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    #[test]
    fn test_spec_defaults() {
        let spec = TaskSpec::new();
        assert_eq!(spec.priority, TaskPriority::Normal);
        assert!(spec.deadline.is_none());
    }
}
