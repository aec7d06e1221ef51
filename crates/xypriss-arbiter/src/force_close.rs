//! Evicting the current owner of a port.

use crate::arbiter::probe;
use crate::error::ArbiterError;
use crate::platform::{
    default_inspector, default_signaller, PortInspector, ProcessSignaller, SignalOutcome,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Grace between the graceful and the forceful signal.
const GRACE: Duration = Duration::from_millis(500);
/// Delay before re-verifying that the port is actually free.
const SETTLE: Duration = Duration::from_secs(1);
/// Inspection command invocations before giving up.
const COMMAND_RETRIES: usize = 3;
/// Backoff between inspection retries.
const COMMAND_BACKOFF: Duration = Duration::from_millis(500);

/// Result of a force-close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceCloseOutcome {
    /// The owner was terminated and the port verified free.
    Freed,
    /// No process held the port.
    AlreadyFree,
    /// The owner is protected; it was not retried and still holds the
    /// port.
    Protected,
}

/// Drives the force-close sequence through the platform shims.
pub struct ForceCloser {
    inspector: Box<dyn PortInspector>,
    signaller: Box<dyn ProcessSignaller>,
}

impl ForceCloser {
    /// The platform's default shims (`lsof`/signals on Unix,
    /// `netstat`/`taskkill` on Windows).
    pub fn platform() -> Self {
        Self {
            inspector: default_inspector(),
            signaller: default_signaller(),
        }
    }

    /// Custom shims; used by tests and exotic platforms.
    pub fn with_shims(
        inspector: Box<dyn PortInspector>,
        signaller: Box<dyn ProcessSignaller>,
    ) -> Self {
        Self {
            inspector,
            signaller,
        }
    }

    pub(crate) async fn force_close(&self, port: u16) -> Result<ForceCloseOutcome, ArbiterError> {
        // One inspection per call; its result is reused for both signal
        // rounds rather than re-parsing OS output in between.
        let pids = self.inspect_with_retry(port).await?;
        if pids.is_empty() {
            return Ok(ForceCloseOutcome::AlreadyFree);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(port, ?pids, "force-closing port owner");

        let mut protected = false;
        let mut survivors = Vec::new();
        for pid in &pids {
            match self.signaller.terminate(*pid, false).await {
                SignalOutcome::Delivered => survivors.push(*pid),
                SignalOutcome::AlreadyGone => {}
                SignalOutcome::Protected => protected = true,
            }
        }
        if protected {
            // A protected owner is never escalated against.
            return Ok(ForceCloseOutcome::Protected);
        }

        tokio::time::sleep(GRACE).await;
        for pid in survivors {
            match self.signaller.terminate(pid, true).await {
                SignalOutcome::Protected => protected = true,
                SignalOutcome::Delivered | SignalOutcome::AlreadyGone => {}
            }
        }
        if protected {
            return Ok(ForceCloseOutcome::Protected);
        }

        tokio::time::sleep(SETTLE).await;
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        if probe(addr) {
            Ok(ForceCloseOutcome::Freed)
        } else {
            Err(ArbiterError::PortInUse { port })
        }
    }

    async fn inspect_with_retry(&self, port: u16) -> Result<Vec<u32>, ArbiterError> {
        let mut last_err = None;
        for attempt in 0..COMMAND_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(COMMAND_BACKOFF).await;
            }
            match self.inspector.pids_listening_on(port).await {
                Ok(pids) => return Ok(pids),
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(port, attempt, "port inspection failed: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(ArbiterError::Command(last_err.unwrap_or_else(|| {
            std::io::Error::other("port inspection failed")
        })))
    }
}
