//! Wiring between the server core and the cluster supervisor.
//!
//! In cluster mode the same binary runs in two roles. The parent calls
//! [`run_supervisor`] and never serves HTTP itself; each child builds its
//! [`crate::ServerCore`] with `reuse_port(true)` and calls
//! [`attach_worker_agent`], which connects the encrypted control link and
//! honors drain/shutdown/reload from the supervisor.

use crate::config::ServerConfig;
use crate::server::ServerCore;
use std::sync::Arc;
use std::time::Duration;
use xypriss_cluster::{
    ClusterConfig, ControlSignal, ResourceLimits, Supervisor, WorkerAgent, WorkerCommand,
    WorkerCount,
};
use xypriss_core::ServerError;

/// Builds and starts a supervisor from the server configuration.
///
/// `command` is how worker processes are launched (typically the current
/// executable with a worker-mode argument).
pub async fn run_supervisor(
    config: &ServerConfig,
    command: WorkerCommand,
) -> Result<Supervisor, ServerError> {
    config.validate()?;
    let security = &config.cluster.security;

    let mut builder = ClusterConfig::builder(command)
        .name("xypriss")
        .workers(match config.cluster.workers {
            crate::config::WorkersOption::Fixed(n) => WorkerCount::Fixed(n),
            crate::config::WorkersOption::Auto(_) => WorkerCount::Auto,
        })
        .sandbox_mode(security.sandbox_mode)
        .limits(ResourceLimits {
            max_open_files: security.max_open_files,
            nice: None,
        });
    if !security.isolate_workers {
        // Workers keep the parent's full environment.
        builder = builder.inherit_env(std::env::vars().map(|(name, _)| name));
    }
    if !security.prevent_fork_bombs {
        // Effectively unlimited restarts; the backoff cap still applies.
        builder = builder.parking_policy(usize::MAX, Duration::from_secs(60));
    }

    let supervisor = Supervisor::new(builder.build()).map_err(ServerError::from)?;
    supervisor.start().await.map_err(ServerError::from)?;
    Ok(supervisor)
}

/// Connects this worker process to its supervisor and honors control
/// signals until shutdown. Returns once the link is up and `READY` is
/// reported; the signal loop runs in the background.
pub async fn attach_worker_agent(
    server: Arc<ServerCore>,
    heartbeat_interval: Duration,
) -> Result<(), ServerError> {
    let (agent, mut signals) = WorkerAgent::from_env(heartbeat_interval)
        .await
        .map_err(ServerError::from)?;

    server.wait_for_ready().await;
    agent.send_ready().await.map_err(ServerError::from)?;

    tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            match signal {
                ControlSignal::Drain => {
                    server.begin_drain();
                    // Ack once in-flight requests are gone.
                    while !server.is_drained() {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    let _ = agent.send_drain_ack().await;
                }
                ControlSignal::Shutdown => {
                    let _ = server.stop(Duration::from_secs(10)).await;
                    break;
                }
                ControlSignal::Reload => {
                    // Route tables are immutable in the child; a reload
                    // releases compiled dispatch state so the parent can
                    // roll new workers with new tables.
                    #[cfg(feature = "tracing")]
                    tracing::info!("reload requested by supervisor");
                }
                ControlSignal::Broadcast(_payload) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("admin broadcast received");
                }
            }
        }
        agent.shutdown();
    });

    Ok(())
}
