//! Cluster error types.

use xypriss_core::ErrorKind;

/// Failures in supervision or on the IPC control plane.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The cluster configuration was rejected.
    #[error("invalid cluster config: {0}")]
    InvalidConfig(String),

    /// Spawning a worker process failed.
    #[error("failed to spawn worker {worker_id}: {reason}")]
    SpawnFailed { worker_id: u32, reason: String },

    /// A frame failed authentication (bad tag or wrong key).
    #[error("IPC authentication failed")]
    AuthFailed,

    /// A frame reused a nonce, regressed its sequence number, or carried a
    /// stale timestamp.
    #[error("IPC replay rejected: {0}")]
    Replay(&'static str),

    /// A frame violated the wire format.
    #[error("IPC frame malformed: {0}")]
    Codec(&'static str),

    /// The peer closed the link or transport I/O failed.
    #[error("IPC transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The addressed worker is parked and needs operator intervention.
    #[error("worker {worker_id} is parked")]
    WorkerParked { worker_id: u32 },

    /// The supervisor is shutting down.
    #[error("cluster shutting down")]
    ShuttingDown,
}

impl ClusterError {
    /// The taxonomy kind for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClusterError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            ClusterError::SpawnFailed { .. } => ErrorKind::WorkerCrashed,
            ClusterError::AuthFailed => ErrorKind::IpcAuthFailed,
            ClusterError::Replay(_) => ErrorKind::IpcReplay,
            ClusterError::Codec(_) => ErrorKind::IpcAuthFailed,
            ClusterError::Io(_) => ErrorKind::UpstreamUnavailable,
            ClusterError::WorkerParked { .. } => ErrorKind::WorkerParked,
            ClusterError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }
}

impl From<ClusterError> for xypriss_core::ServerError {
    fn from(err: ClusterError) -> Self {
        xypriss_core::ServerError::new(err.kind(), err.to_string())
    }
}
