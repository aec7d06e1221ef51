//! Cluster supervision for XyPriss.
//!
//! A [`Supervisor`] runs N worker processes, each serving its own listener,
//! and keeps them alive: heartbeat monitoring, crash restarts with
//! exponential backoff, parking of crash-looping workers, and a
//! drain-then-shutdown lifecycle.
//!
//! The control plane between the parent and each child is authenticated
//! encryption over a private channel (Unix domain socket where available,
//! loopback TCP elsewhere). At handshake the parent issues a fresh session
//! key sealed under a pre-shared root secret; every subsequent frame is
//! ChaCha20-Poly1305 under the session key with the frame header as
//! associated data. Nonce reuse, sequence regressions, and stale
//! timestamps are dropped before delivery, and a frame whose tag fails
//! verification terminates the session.
//!
//! Workers are isolated from each other: there is no worker-to-worker
//! control channel, only parent↔child links. On Unix each child runs in
//! its own process group so signals take its whole subtree down together.
//!
//! The child side of the link is [`WorkerAgent`]: it performs the
//! handshake, sends heartbeats, and surfaces control messages (drain,
//! shutdown, reload, broadcast) to the embedding server.

mod backoff;
mod config;
mod error;
mod events;
pub mod ipc;
mod supervisor;
mod worker;

pub use backoff::{RestartBackoff, RestartWindow};
pub use config::{
    ClusterConfig, ClusterConfigBuilder, ResourceLimits, WorkerCommand, WorkerCount,
};
pub use error::ClusterError;
pub use events::ClusterEvent;
pub use ipc::endpoint::IpcEndpoint;
pub use supervisor::{ClusterHealth, Supervisor, WorkerSnapshot, WorkerState};
pub use worker::{ControlSignal, WorkerAgent};

/// Environment variables the supervisor sets on spawned workers.
pub mod env {
    /// The worker's numeric id.
    pub const WORKER_ID: &str = "XYPRISS_WORKER_ID";
    /// The IPC endpoint to dial back (`unix:<path>` or `tcp:<addr>`).
    pub const IPC_ENDPOINT: &str = "XYPRISS_IPC_ENDPOINT";
    /// Hex-encoded root secret for the IPC handshake.
    pub const CLUSTER_SECRET: &str = "XYPRISS_CLUSTER_SECRET";
}
