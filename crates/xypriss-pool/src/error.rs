//! Worker pool error types.

use xypriss_core::ErrorKind;

/// Error surfaced to a task's submitter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    /// The task missed its deadline, whether queued or running.
    #[error("task deadline elapsed")]
    Timeout,

    /// The task was cancelled through its handle before the deadline.
    #[error("task cancelled")]
    Cancelled,

    /// The task closure failed or panicked.
    #[error("task failed: {0}")]
    HandlerError(String),

    /// The lane's queue is at its high-water mark.
    #[error("queue saturated ({queued}/{high_water})")]
    QueueSaturated { queued: usize, high_water: usize },

    /// The pool no longer accepts submissions.
    #[error("pool shutting down")]
    PoolShuttingDown,
}

impl PoolError {
    /// The taxonomy kind for the default error responder.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Timeout => ErrorKind::Timeout,
            PoolError::Cancelled => ErrorKind::Cancelled,
            PoolError::HandlerError(_) => ErrorKind::HandlerError,
            PoolError::QueueSaturated { .. } => ErrorKind::QueueSaturated,
            PoolError::PoolShuttingDown => ErrorKind::PoolShuttingDown,
        }
    }
}

impl From<PoolError> for xypriss_core::ServerError {
    fn from(err: PoolError) -> Self {
        xypriss_core::ServerError::new(err.kind(), err.to_string())
    }
}
