//! Force-close against a real port owner.
//!
//! Spawns this crate's binary as a separate process group holding a port,
//! evicts it through the arbiter, and re-acquires the port. Skipped when
//! `lsof` is unavailable (the Unix inspector shells out to it).

#![cfg(unix)]

use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;
use xypriss_arbiter::{AcquireOptions, ForceCloseOutcome, PortArbiter};

fn lsof_available() -> bool {
    Command::new("lsof")
        .arg("-v")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

async fn wait_for_listener(port: u16) -> bool {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn force_close_frees_port_for_reacquisition() {
    if !lsof_available() {
        eprintln!("skipping: lsof not available");
        return;
    }

    // A high port unlikely to collide; the owner is a child in its own
    // process group so group signals cannot reach the test itself.
    let port = 48098;
    let mut child = {
        let mut command = Command::new(env!("CARGO_BIN_EXE_xypriss"));
        command
            .args(["server", "start", "--port", &port.to_string(), "--host", "127.0.0.1"])
            .arg("--pid-file")
            .arg(format!("/tmp/xypriss-test-{port}.pid"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                eprintln!("skipping: cannot spawn server binary: {err}");
                return;
            }
        }
    };

    if !wait_for_listener(port).await {
        let _ = child.kill();
        panic!("server child never started listening");
    }

    let arbiter = PortArbiter::new();
    let outcome = arbiter.force_close(port).await.unwrap();
    assert_eq!(outcome, ForceCloseOutcome::Freed);

    // Re-acquisition succeeds promptly after the close reports freed.
    let reacquired = tokio::time::timeout(
        Duration::from_secs(2),
        arbiter.acquire("127.0.0.1".parse().unwrap(), port, &AcquireOptions::new()),
    )
    .await
    .expect("re-acquire timed out")
    .expect("port not free after force close");
    assert_eq!(reacquired.addr().port(), port);

    let _ = child.wait();
}
