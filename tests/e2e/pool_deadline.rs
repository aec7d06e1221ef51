//! Worker-pool deadline and accounting scenarios.

use std::time::Duration;
use xypriss_pool::{PoolError, TaskSpec, WorkerPool, WorkerPoolConfig};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deadline_beats_slow_cpu_task() {
    let pool = WorkerPool::new(WorkerPoolConfig::builder().cpu(1, 1).io(1, 1).build());

    // 100 ms deadline against ~500 ms of cooperative work.
    let handle = pool
        .submit_cpu(
            TaskSpec::new().deadline(Duration::from_millis(100)),
            |cancel| {
                for _ in 0..50 {
                    if cancel.is_cancelled() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Ok("never observed")
            },
        )
        .unwrap();

    assert!(matches!(handle.await, Err(PoolError::Timeout)));

    let stats = pool.stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.successes, 0);
    assert_eq!(stats.total_executed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_task_past_deadline_times_out() {
    let pool = WorkerPool::new(WorkerPoolConfig::builder().io(1, 1).cpu(1, 1).build());

    let gate = std::sync::Arc::new(tokio::sync::Semaphore::new(0));
    let gate_clone = std::sync::Arc::clone(&gate);
    let blocker = pool
        .submit_io(TaskSpec::new(), move |_cancel| async move {
            let _ = gate_clone.acquire().await;
            Ok(())
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Queued behind the blocker with a deadline shorter than the block.
    let starved = pool
        .submit_io(
            TaskSpec::new().deadline(Duration::from_millis(50)),
            |_cancel| async { Ok(()) },
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    gate.add_permits(1);
    blocker.await.unwrap();

    // Reported as Timeout, not Cancelled: the deadline elapsed in queue.
    assert!(matches!(starved.await, Err(PoolError::Timeout)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kinds_are_isolated() {
    let pool = WorkerPool::new(
        WorkerPoolConfig::builder()
            .cpu(1, 1)
            .io(1, 1)
            .max_queued_tasks(2)
            .build(),
    );

    // Saturate the CPU lane; the IO lane must stay available.
    let gate = std::sync::Arc::new(tokio::sync::Semaphore::new(0));
    let mut cpu_tasks = Vec::new();
    for _ in 0..3 {
        let gate = std::sync::Arc::clone(&gate);
        cpu_tasks.push(
            pool.submit_cpu(TaskSpec::new(), move |_cancel| {
                while gate.try_acquire().is_err() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            })
            .unwrap(),
        );
    }

    let io = pool
        .submit_io(TaskSpec::new(), |_cancel| async { Ok("io unblocked") })
        .unwrap();
    assert_eq!(io.await.unwrap(), "io unblocked");

    gate.add_permits(3);
    for task in cpu_tasks {
        task.await.unwrap();
    }
}
