//! The child-process side of the control plane.

use crate::error::ClusterError;
use crate::ipc::endpoint::IpcEndpoint;
use crate::ipc::frame::MessageType;
use crate::ipc::session::child_handshake;
use crate::ipc::RootKey;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Control messages the supervisor can push to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// Stop accepting new connections, finish in-flight work.
    Drain,
    /// Exit after draining.
    Shutdown,
    /// Re-read routing/middleware tables.
    Reload,
    /// Admin broadcast payload.
    Broadcast(serde_json::Value),
}

/// Messages the agent task sends up the link.
#[derive(Debug)]
enum AgentOutbound {
    Ready,
    DrainAck,
    Stats(serde_json::Value),
}

/// The worker's side of the encrypted link to its supervisor.
///
/// [`WorkerAgent::connect`] performs the handshake, starts the heartbeat
/// loop, and returns the agent plus the stream of [`ControlSignal`]s the
/// embedding server must honor.
pub struct WorkerAgent {
    outbound: mpsc::Sender<AgentOutbound>,
    shutdown: CancellationToken,
}

impl WorkerAgent {
    /// Reads the worker identity and endpoint from the environment the
    /// supervisor set, then connects.
    pub async fn from_env(
        heartbeat_interval: Duration,
    ) -> Result<(Self, mpsc::Receiver<ControlSignal>), ClusterError> {
        let worker_id: u32 = std::env::var(crate::env::WORKER_ID)
            .ok()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ClusterError::InvalidConfig("worker id not set".to_string()))?;
        let endpoint = std::env::var(crate::env::IPC_ENDPOINT)
            .map_err(|_| ClusterError::InvalidConfig("ipc endpoint not set".to_string()))?;
        let endpoint = IpcEndpoint::parse(&endpoint)?;
        let secret_hex = std::env::var(crate::env::CLUSTER_SECRET)
            .map_err(|_| ClusterError::InvalidConfig("cluster secret not set".to_string()))?;
        let root = RootKey::from_hex(&secret_hex)?;
        Self::connect_with_root(&endpoint, worker_id, root, heartbeat_interval).await
    }

    /// Connects with an explicit secret (the raw pre-shared bytes).
    pub async fn connect(
        endpoint: &IpcEndpoint,
        worker_id: u32,
        secret: &[u8],
        heartbeat_interval: Duration,
    ) -> Result<(Self, mpsc::Receiver<ControlSignal>), ClusterError> {
        Self::connect_with_root(
            endpoint,
            worker_id,
            RootKey::from_secret(secret),
            heartbeat_interval,
        )
        .await
    }

    async fn connect_with_root(
        endpoint: &IpcEndpoint,
        worker_id: u32,
        root: RootKey,
        heartbeat_interval: Duration,
    ) -> Result<(Self, mpsc::Receiver<ControlSignal>), ClusterError> {
        let stream = endpoint.connect().await?;
        let session = child_handshake(stream, root, worker_id).await?;
        let (mut reader, mut writer) = session.split();

        let (signal_tx, signal_rx) = mpsc::channel::<ControlSignal>(16);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<AgentOutbound>(16);
        let shutdown = CancellationToken::new();
        let task_shutdown = shutdown.clone();

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat_interval);
            heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        let payload = serde_json::json!({ "busy": false });
                        if writer.send_json(MessageType::Heartbeat, &payload).await.is_err() {
                            break;
                        }
                    }
                    outbound = outbound_rx.recv() => {
                        let result = match outbound {
                            Some(AgentOutbound::Ready) => {
                                writer.send(MessageType::Ready, b"").await
                            }
                            Some(AgentOutbound::DrainAck) => {
                                writer.send(MessageType::DrainAck, b"").await
                            }
                            Some(AgentOutbound::Stats(stats)) => {
                                writer.send_json(MessageType::Stats, &stats).await
                            }
                            None => break,
                        };
                        if result.is_err() {
                            break;
                        }
                    }
                    incoming = reader.recv() => match incoming {
                        Ok(message) => {
                            let signal = match message.msg_type {
                                MessageType::Drain => Some(ControlSignal::Drain),
                                MessageType::Shutdown => Some(ControlSignal::Shutdown),
                                MessageType::Reload => Some(ControlSignal::Reload),
                                MessageType::WorkBroadcast => message
                                    .json()
                                    .ok()
                                    .map(ControlSignal::Broadcast),
                                _ => None,
                            };
                            if let Some(signal) = signal {
                                if signal_tx.send(signal).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(ClusterError::Replay(_reason)) => {
                            // Dropped, link survives.
                            #[cfg(feature = "tracing")]
                            tracing::warn!("dropped replayed control frame: {_reason}");
                        }
                        Err(_) => break,
                    },
                    _ = task_shutdown.cancelled() => break,
                }
            }
        });

        Ok((
            Self {
                outbound: outbound_tx,
                shutdown,
            },
            signal_rx,
        ))
    }

    /// Reports the worker ready to take traffic.
    pub async fn send_ready(&self) -> Result<(), ClusterError> {
        self.outbound
            .send(AgentOutbound::Ready)
            .await
            .map_err(|_| ClusterError::ShuttingDown)
    }

    /// Acknowledges a drain: no new connections, in-flight finished.
    pub async fn send_drain_ack(&self) -> Result<(), ClusterError> {
        self.outbound
            .send(AgentOutbound::DrainAck)
            .await
            .map_err(|_| ClusterError::ShuttingDown)
    }

    /// Pushes a stats snapshot to the supervisor.
    pub async fn send_stats(&self, stats: serde_json::Value) -> Result<(), ClusterError> {
        self.outbound
            .send(AgentOutbound::Stats(stats))
            .await
            .map_err(|_| ClusterError::ShuttingDown)
    }

    /// Tears the link down.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for WorkerAgent {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
