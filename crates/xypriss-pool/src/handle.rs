//! The submitter's side of a task.

use crate::error::PoolError;
use crate::task::TaskId;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pin_project! {
    /// Handle to a submitted task.
    ///
    /// Awaiting it yields the task's result. Dropping it detaches: the task
    /// keeps running unless cancelled.
    pub struct TaskHandle<T> {
        id: TaskId,
        cancel: CancellationToken,
        #[pin]
        rx: oneshot::Receiver<Result<T, PoolError>>,
    }
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: TaskId,
        cancel: CancellationToken,
        rx: oneshot::Receiver<Result<T, PoolError>>,
    ) -> Self {
        Self { id, cancel, rx }
    }

    /// The pool-unique id of this task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Requests cooperative cancellation. A running task observes the
    /// signal through the token it was handed; a queued task is cancelled
    /// when a worker picks it up. The handle then resolves with
    /// [`PoolError::Cancelled`] (or [`PoolError::Timeout`] if the deadline
    /// elapsed first).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, PoolError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.rx.poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The pool dropped the task without resolving it; only shutdown
            // tears senders down like that.
            Poll::Ready(Err(_)) => Poll::Ready(Err(PoolError::PoolShuttingDown)),
            Poll::Pending => Poll::Pending,
        }
    }
}
