//! The XyPriss worker pool.
//!
//! Two typed lanes of long-lived workers (one for CPU-bound closures, one
//! for I/O-bound futures) execute submitted tasks off the request path with
//! bounded concurrency, priority scheduling, per-task deadlines, and
//! backpressure.
//!
//! # Guarantees
//!
//! - **Ordering**: tasks start in `(priority desc, submission order)`;
//!   within one priority the tie-break on submission id is stable.
//! - **Backpressure**: when a lane's queue reaches its high-water mark,
//!   [`WorkerPool::submit_cpu`]/[`WorkerPool::submit_io`] return
//!   [`PoolError::QueueSaturated`] instead of blocking.
//! - **Deadlines**: a task past its deadline, queued or running, resolves
//!   as [`PoolError::Timeout`], never `Cancelled`. Running tasks observe
//!   the cooperative cancellation signal.
//! - **Containment**: a panicking task surfaces as
//!   [`PoolError::HandlerError`] to its submitter; the worker survives and
//!   the queue is untouched.
//! - **Shutdown**: accepted tasks are drained; new submissions fail with
//!   [`PoolError::PoolShuttingDown`].
//!
//! # Example
//!
//! ```rust,no_run
//! use xypriss_pool::{TaskPriority, TaskSpec, WorkerPool, WorkerPoolConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = WorkerPool::new(WorkerPoolConfig::default());
//!
//! let handle = pool.submit_cpu(
//!     TaskSpec::new().priority(TaskPriority::High),
//!     |cancel| {
//!         let mut checksum = 0u64;
//!         for chunk in 0..1024u64 {
//!             if cancel.is_cancelled() {
//!                 break;
//!             }
//!             checksum = checksum.wrapping_add(chunk);
//!         }
//!         Ok(checksum)
//!     },
//! )?;
//!
//! let checksum = handle.await?;
//! # let _ = checksum;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod events;
mod handle;
mod pool;
mod queue;
mod task;

pub use config::{LaneConfig, WorkerPoolConfig, WorkerPoolConfigBuilder};
pub use error::PoolError;
pub use events::PoolEvent;
pub use handle::TaskHandle;
pub use pool::{PoolStats, WorkerPool};
pub use task::{TaskId, TaskKind, TaskPriority, TaskSpec};
