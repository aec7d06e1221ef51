//! Cluster events.

use std::time::Instant;
use xypriss_core::events::ServerEvent;

/// Events emitted by the supervisor.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    WorkerStarted {
        cluster_name: String,
        timestamp: Instant,
        worker_id: u32,
        pid: u32,
    },
    WorkerReady {
        cluster_name: String,
        timestamp: Instant,
        worker_id: u32,
    },
    /// A worker exited or missed its heartbeat budget.
    WorkerDied {
        cluster_name: String,
        timestamp: Instant,
        worker_id: u32,
        reason: String,
    },
    WorkerRestarted {
        cluster_name: String,
        timestamp: Instant,
        worker_id: u32,
        restarts_in_window: usize,
    },
    /// Crash budget exhausted; the worker stays down.
    WorkerParked {
        cluster_name: String,
        timestamp: Instant,
        worker_id: u32,
    },
    /// An IPC frame was rejected before delivery.
    IpcRejected {
        cluster_name: String,
        timestamp: Instant,
        worker_id: u32,
        reason: &'static str,
    },
}

impl ServerEvent for ClusterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ClusterEvent::WorkerStarted { .. } => "worker_started",
            ClusterEvent::WorkerReady { .. } => "worker_ready",
            ClusterEvent::WorkerDied { .. } => "worker_died",
            ClusterEvent::WorkerRestarted { .. } => "worker_restarted",
            ClusterEvent::WorkerParked { .. } => "worker_parked",
            ClusterEvent::IpcRejected { .. } => "ipc_rejected",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ClusterEvent::WorkerStarted { timestamp, .. }
            | ClusterEvent::WorkerReady { timestamp, .. }
            | ClusterEvent::WorkerDied { timestamp, .. }
            | ClusterEvent::WorkerRestarted { timestamp, .. }
            | ClusterEvent::WorkerParked { timestamp, .. }
            | ClusterEvent::IpcRejected { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            ClusterEvent::WorkerStarted { cluster_name, .. }
            | ClusterEvent::WorkerReady { cluster_name, .. }
            | ClusterEvent::WorkerDied { cluster_name, .. }
            | ClusterEvent::WorkerRestarted { cluster_name, .. }
            | ClusterEvent::WorkerParked { cluster_name, .. }
            | ClusterEvent::IpcRejected { cluster_name, .. } => cluster_name,
        }
    }
}
