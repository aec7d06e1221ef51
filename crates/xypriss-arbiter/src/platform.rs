//! Platform shims for process discovery and signalling.
//!
//! All OS-output parsing lives here; the force-close logic above works in
//! terms of pids and [`SignalOutcome`]s only.

use futures::future::BoxFuture;
use std::io;
use tokio::process::Command;

/// Discovers the processes listening on a TCP port.
pub trait PortInspector: Send + Sync {
    /// Pids with a listening socket whose local address has exactly this
    /// port. Substring matches on unrelated ports are a bug.
    fn pids_listening_on(&self, port: u16) -> BoxFuture<'_, io::Result<Vec<u32>>>;
}

/// Result of delivering a termination signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The signal was delivered.
    Delivered,
    /// The process was already gone. Non-fatal.
    AlreadyGone,
    /// The platform refused to let us signal this process. Non-fatal, but
    /// never retried.
    Protected,
}

/// Delivers termination signals to a process (group).
pub trait ProcessSignaller: Send + Sync {
    /// Sends a graceful (`forceful = false`) or forceful termination to the
    /// process group of `pid` where the platform supports groups, otherwise
    /// to the process itself.
    fn terminate(&self, pid: u32, forceful: bool) -> BoxFuture<'_, SignalOutcome>;
}

/// The platform's default inspector.
pub(crate) fn default_inspector() -> Box<dyn PortInspector> {
    #[cfg(unix)]
    {
        Box::new(unix::LsofInspector)
    }
    #[cfg(not(unix))]
    {
        Box::new(windows::NetstatInspector)
    }
}

/// The platform's default signaller.
pub(crate) fn default_signaller() -> Box<dyn ProcessSignaller> {
    #[cfg(unix)]
    {
        Box::new(unix::GroupSignaller)
    }
    #[cfg(not(unix))]
    {
        Box::new(windows::TaskkillSignaller)
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    /// `lsof` restricted to listening TCP sockets on the exact port.
    pub(crate) struct LsofInspector;

    impl PortInspector for LsofInspector {
        fn pids_listening_on(&self, port: u16) -> BoxFuture<'_, io::Result<Vec<u32>>> {
            Box::pin(async move {
                let output = Command::new("lsof")
                    .arg("-nP")
                    .arg(format!("-iTCP:{port}"))
                    .arg("-sTCP:LISTEN")
                    .arg("-t")
                    .kill_on_drop(true)
                    .output()
                    .await?;
                // lsof exits 1 when nothing matches; only spawn failures
                // and real errors reach the caller.
                let mut pids: Vec<u32> = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .filter_map(|line| line.trim().parse().ok())
                    .collect();
                pids.sort_unstable();
                pids.dedup();
                Ok(pids)
            })
        }
    }

    /// Signals the owner's whole process group so the subtree dies with it.
    pub(crate) struct GroupSignaller;

    impl ProcessSignaller for GroupSignaller {
        fn terminate(&self, pid: u32, forceful: bool) -> BoxFuture<'_, SignalOutcome> {
            Box::pin(async move {
                let signal = if forceful {
                    Signal::SIGKILL
                } else {
                    Signal::SIGTERM
                };
                let target = Pid::from_raw(pid as i32);
                let group = getpgid(Some(target)).unwrap_or(target);
                match killpg(group, signal) {
                    Ok(()) => SignalOutcome::Delivered,
                    Err(nix::errno::Errno::ESRCH) => SignalOutcome::AlreadyGone,
                    Err(nix::errno::Errno::EPERM) => SignalOutcome::Protected,
                    Err(_) => SignalOutcome::Protected,
                }
            })
        }
    }
}

#[cfg(not(unix))]
mod windows {
    use super::*;

    /// `netstat -ano` filtered to LISTENING rows with the exact local port.
    pub(crate) struct NetstatInspector;

    impl PortInspector for NetstatInspector {
        fn pids_listening_on(&self, port: u16) -> BoxFuture<'_, io::Result<Vec<u32>>> {
            Box::pin(async move {
                let output = Command::new("netstat")
                    .arg("-ano")
                    .arg("-p")
                    .arg("tcp")
                    .kill_on_drop(true)
                    .output()
                    .await?;
                let text = String::from_utf8_lossy(&output.stdout);
                let mut pids = Vec::new();
                for line in text.lines() {
                    let columns: Vec<&str> = line.split_whitespace().collect();
                    // Proto Local Foreign State PID
                    if columns.len() < 5 || !columns[3].eq_ignore_ascii_case("LISTENING") {
                        continue;
                    }
                    let local_port = columns[1]
                        .rsplit_once(':')
                        .and_then(|(_, p)| p.parse::<u16>().ok());
                    if local_port == Some(port) {
                        if let Ok(pid) = columns[4].parse() {
                            pids.push(pid);
                        }
                    }
                }
                pids.sort_unstable();
                pids.dedup();
                Ok(pids)
            })
        }
    }

    /// `taskkill /T` to take the owner's process tree down together.
    pub(crate) struct TaskkillSignaller;

    impl ProcessSignaller for TaskkillSignaller {
        fn terminate(&self, pid: u32, forceful: bool) -> BoxFuture<'_, SignalOutcome> {
            Box::pin(async move {
                let mut command = Command::new("taskkill");
                command.arg("/PID").arg(pid.to_string()).arg("/T");
                if forceful {
                    command.arg("/F");
                }
                match command.kill_on_drop(true).output().await {
                    Ok(output) if output.status.success() => SignalOutcome::Delivered,
                    Ok(output) => {
                        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
                        if stderr.contains("not found") {
                            SignalOutcome::AlreadyGone
                        } else {
                            SignalOutcome::Protected
                        }
                    }
                    Err(_) => SignalOutcome::Protected,
                }
            })
        }
    }
}
