//! The cluster supervisor.

use crate::backoff::{RestartBackoff, RestartWindow};
use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::events::ClusterEvent;
use crate::ipc::endpoint::{IpcEndpoint, IpcListener};
use crate::ipc::frame::MessageType;
use crate::ipc::session::{parent_handshake, Session};
use crate::ipc::RootKey;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Ready,
    Busy,
    Draining,
    Dead,
    /// Crash budget exhausted; not restarted until operator intervention.
    Parked,
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub id: u32,
    pub pid: Option<u32>,
    pub state: WorkerState,
    pub restarts: u32,
    pub last_heartbeat: Option<Instant>,
}

/// Aggregate cluster health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterHealth {
    Healthy,
    /// Some workers are parked; the rest keep serving.
    Degraded { parked: Vec<u32> },
    Stopped,
}

/// Admin control messages pushed down a worker link.
#[derive(Debug, Clone)]
enum Outbound {
    Drain,
    Shutdown,
    Reload,
    Broadcast(serde_json::Value),
}

struct WorkerRecord {
    id: u32,
    pid: Option<u32>,
    state: WorkerState,
    backoff: RestartBackoff,
    window: RestartWindow,
    last_heartbeat: Option<Instant>,
    restarts_total: u32,
    drained: bool,
    link: Option<mpsc::Sender<Outbound>>,
}

impl WorkerRecord {
    fn new(id: u32, config: &ClusterConfig) -> Self {
        Self {
            id,
            pid: None,
            state: WorkerState::Starting,
            backoff: RestartBackoff::new(config.restart_backoff_base, config.restart_backoff_cap),
            window: RestartWindow::new(config.restart_window),
            last_heartbeat: None,
            restarts_total: 0,
            drained: false,
            link: None,
        }
    }
}

struct Inner {
    config: ClusterConfig,
    root: RootKey,
    endpoint: Mutex<Option<IpcEndpoint>>,
    workers: Mutex<HashMap<u32, WorkerRecord>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

/// Parent process supervising N worker processes over encrypted IPC.
///
/// Cloning shares the supervisor.
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Clone for Supervisor {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Supervisor {
    pub fn new(config: ClusterConfig) -> Result<Self, ClusterError> {
        config.validate()?;
        let root = RootKey::from_secret(&config.secret);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                root,
                endpoint: Mutex::new(None),
                workers: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Binds the control plane, spawns the workers, and starts the
    /// monitor. Idempotence is an error: a supervisor starts once.
    pub async fn start(&self) -> Result<(), ClusterError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ClusterError::InvalidConfig(
                "supervisor already started".to_string(),
            ));
        }

        let desired = IpcEndpoint::private(&self.inner.config.name);
        let (listener, actual) = IpcListener::bind(&desired).await?;
        *self.inner.endpoint.lock() = Some(actual);

        let accept = {
            let supervisor = self.clone();
            tokio::spawn(async move { supervisor.accept_loop(listener).await })
        };
        self.inner.tasks.lock().push(accept);

        let count = self.inner.config.workers.resolve();
        for id in 1..=count {
            self.inner
                .workers
                .lock()
                .insert(id, WorkerRecord::new(id, &self.inner.config));
            self.spawn_worker(id).await?;
        }

        let monitor = {
            let supervisor = self.clone();
            tokio::spawn(async move { supervisor.monitor_loop().await })
        };
        self.inner.tasks.lock().push(monitor);
        Ok(())
    }

    /// The control-plane endpoint, once started. Workers receive it via
    /// the environment.
    pub fn endpoint(&self) -> Option<IpcEndpoint> {
        self.inner.endpoint.lock().clone()
    }

    pub fn health(&self) -> ClusterHealth {
        if self.inner.shutdown.is_cancelled() {
            return ClusterHealth::Stopped;
        }
        let workers = self.inner.workers.lock();
        let parked: Vec<u32> = workers
            .values()
            .filter(|w| w.state == WorkerState::Parked)
            .map(|w| w.id)
            .collect();
        if parked.is_empty() {
            ClusterHealth::Healthy
        } else {
            let mut parked = parked;
            parked.sort_unstable();
            ClusterHealth::Degraded { parked }
        }
    }

    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        let mut snapshots: Vec<WorkerSnapshot> = self
            .inner
            .workers
            .lock()
            .values()
            .map(|w| WorkerSnapshot {
                id: w.id,
                pid: w.pid,
                state: w.state,
                restarts: w.restarts_total,
                last_heartbeat: w.last_heartbeat,
            })
            .collect();
        snapshots.sort_by_key(|w| w.id);
        snapshots
    }

    /// Sends an admin broadcast to every linked worker. Never used to
    /// route HTTP requests.
    pub async fn broadcast(&self, payload: serde_json::Value) {
        let links: Vec<mpsc::Sender<Outbound>> = self
            .inner
            .workers
            .lock()
            .values()
            .filter_map(|w| w.link.clone())
            .collect();
        for link in links {
            let _ = link.send(Outbound::Broadcast(payload.clone())).await;
        }
    }

    /// Asks every worker to reload its routing/middleware tables.
    pub async fn reload(&self) {
        let links: Vec<mpsc::Sender<Outbound>> = self
            .inner
            .workers
            .lock()
            .values()
            .filter_map(|w| w.link.clone())
            .collect();
        for link in links {
            let _ = link.send(Outbound::Reload).await;
        }
    }

    /// Graceful shutdown: DRAIN, bounded wait for acks and idle, SHUTDOWN,
    /// bounded wait for exits, then forced termination of the process
    /// groups.
    pub async fn stop(&self) {
        let links: Vec<mpsc::Sender<Outbound>> = self
            .inner
            .workers
            .lock()
            .values()
            .filter_map(|w| w.link.clone())
            .collect();

        for link in &links {
            let _ = link.send(Outbound::Drain).await;
        }
        let drained = |inner: &Inner| {
            inner
                .workers
                .lock()
                .values()
                .all(|w| w.drained || w.link.is_none() || w.state == WorkerState::Parked)
        };
        let _ = tokio::time::timeout(self.inner.config.drain_timeout, async {
            while !drained(&self.inner) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        for link in &links {
            let _ = link.send(Outbound::Shutdown).await;
        }
        let exited = |inner: &Inner| {
            inner.workers.lock().values().all(|w| {
                matches!(w.state, WorkerState::Dead | WorkerState::Parked) || w.pid.is_none()
            })
        };
        let _ = tokio::time::timeout(self.inner.config.shutdown_timeout, async {
            while !exited(&self.inner) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        // Anything still alive goes down with its process group.
        self.inner.shutdown.cancel();
        let survivors: Vec<u32> = self
            .inner
            .workers
            .lock()
            .values()
            .filter(|w| !matches!(w.state, WorkerState::Dead | WorkerState::Parked))
            .filter_map(|w| w.pid)
            .collect();
        for pid in survivors {
            force_kill(pid);
        }

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }

    /// Returns a parked worker to service.
    pub async fn unpark(&self, worker_id: u32) -> Result<(), ClusterError> {
        {
            let mut workers = self.inner.workers.lock();
            let record = workers
                .get_mut(&worker_id)
                .ok_or(ClusterError::WorkerParked { worker_id })?;
            if record.state != WorkerState::Parked {
                return Ok(());
            }
            record.state = WorkerState::Starting;
            record.backoff.reset();
        }
        self.spawn_worker(worker_id).await
    }

    fn spawn_worker(
        &self,
        id: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ClusterError>> + Send + '_>>
    {
        Box::pin(self.spawn_worker_inner(id))
    }

    async fn spawn_worker_inner(&self, id: u32) -> Result<(), ClusterError> {
        let config = &self.inner.config;
        let endpoint = self
            .endpoint()
            .ok_or_else(|| ClusterError::InvalidConfig("supervisor not started".to_string()))?;

        let mut command = Command::new(&config.command.program);
        command.args(&config.command.args);
        command.env_clear();
        if !config.sandbox_mode {
            for name in &config.inherit_env {
                if let Ok(value) = std::env::var(name) {
                    command.env(name, value);
                }
            }
        }
        for (name, value) in &config.command.env {
            command.env(name, value);
        }
        command.env(crate::env::WORKER_ID, id.to_string());
        command.env(crate::env::IPC_ENDPOINT, endpoint.to_string());
        command.env(crate::env::CLUSTER_SECRET, self.inner.root.to_hex());
        command.stdin(Stdio::null());
        command.kill_on_drop(false);

        #[cfg(unix)]
        {
            let limits = config.limits;
            unsafe {
                command.pre_exec(move || {
                    // Own process group so signals reach the whole subtree.
                    nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                        .map_err(std::io::Error::from)?;
                    if let Some(max_files) = limits.max_open_files {
                        nix::sys::resource::setrlimit(
                            nix::sys::resource::Resource::RLIMIT_NOFILE,
                            max_files,
                            max_files,
                        )
                        .map_err(std::io::Error::from)?;
                    }
                    if let Some(nice) = limits.nice {
                        // Lowering priority only; failures are not fatal.
                        let _ = unsafe { nix::libc::nice(nice) };
                    }
                    Ok(())
                });
            }
        }

        let mut child = command.spawn().map_err(|err| ClusterError::SpawnFailed {
            worker_id: id,
            reason: err.to_string(),
        })?;
        let pid = child.id();

        {
            let mut workers = self.inner.workers.lock();
            let record = workers
                .entry(id)
                .or_insert_with(|| WorkerRecord::new(id, config));
            record.pid = pid;
            record.state = WorkerState::Starting;
            record.drained = false;
        }
        self.emit(ClusterEvent::WorkerStarted {
            cluster_name: config.name.clone(),
            timestamp: std::time::Instant::now(),
            worker_id: id,
            pid: pid.unwrap_or(0),
        });
        #[cfg(feature = "metrics")]
        metrics::counter!(
            "xypriss_cluster_worker_spawns_total",
            "cluster" => config.name.clone()
        )
        .increment(1);

        // Exit watcher: restarts on crash, parks on a crash loop.
        let supervisor = self.clone();
        let watcher = tokio::spawn(async move {
            let status = child.wait().await;
            if supervisor.inner.shutdown.is_cancelled() {
                return;
            }
            let reason = match status {
                Ok(status) => format!("exited with {status}"),
                Err(err) => format!("wait failed: {err}"),
            };
            supervisor.handle_exit(id, reason).await;
        });
        self.inner.tasks.lock().push(watcher);
        Ok(())
    }

    async fn handle_exit(&self, id: u32, reason: String) {
        let config = &self.inner.config;
        self.emit(ClusterEvent::WorkerDied {
            cluster_name: config.name.clone(),
            timestamp: std::time::Instant::now(),
            worker_id: id,
            reason,
        });

        let decision = {
            let mut workers = self.inner.workers.lock();
            let Some(record) = workers.get_mut(&id) else {
                return;
            };
            record.state = WorkerState::Dead;
            record.pid = None;
            record.link = None;
            record.last_heartbeat = None;

            let crashes = record.window.record(Instant::now());
            if crashes > config.max_restarts {
                record.state = WorkerState::Parked;
                None
            } else {
                record.restarts_total += 1;
                Some((record.backoff.next_delay(), crashes))
            }
        };

        match decision {
            None => {
                #[cfg(feature = "tracing")]
                tracing::error!(worker = id, "worker parked after crash loop");
                self.emit(ClusterEvent::WorkerParked {
                    cluster_name: config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    worker_id: id,
                });
            }
            Some((delay, crashes)) => {
                self.emit(ClusterEvent::WorkerRestarted {
                    cluster_name: config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    worker_id: id,
                    restarts_in_window: crashes,
                });
                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "xypriss_cluster_restarts_total",
                    "cluster" => config.name.clone()
                )
                .increment(1);

                tokio::time::sleep(delay).await;
                if !self.inner.shutdown.is_cancelled() {
                    let _ = self.spawn_worker(id).await;
                }
            }
        }
    }

    async fn accept_loop(&self, listener: IpcListener) {
        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(stream) => stream,
                    Err(_) => continue,
                },
                _ = self.inner.shutdown.cancelled() => return,
            };

            let supervisor = self.clone();
            let root = self.inner.root.clone();
            tokio::spawn(async move {
                match parent_handshake(stream, root).await {
                    Ok((session, worker_id)) => supervisor.run_link(session, worker_id).await,
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("worker handshake failed: {_err}");
                    }
                }
            });
        }
    }

    async fn run_link(&self, session: Session, worker_id: u32) {
        let (tx, mut rx) = mpsc::channel::<Outbound>(16);
        {
            let mut workers = self.inner.workers.lock();
            let Some(record) = workers.get_mut(&worker_id) else {
                // Unknown worker id: not one of ours.
                return;
            };
            record.link = Some(tx);
        }

        let (mut reader, mut writer) = session.split();
        loop {
            tokio::select! {
                incoming = reader.recv() => match incoming {
                    Ok(message) => self.handle_message(worker_id, message),
                    Err(err @ ClusterError::Replay(_)) => {
                        self.reject(worker_id, &err);
                        // Replays are dropped; the session survives.
                    }
                    Err(err) => {
                        if !matches!(err, ClusterError::Io(_)) {
                            self.reject(worker_id, &err);
                        }
                        break;
                    }
                },
                outbound = rx.recv() => match outbound {
                    Some(Outbound::Drain) => {
                        let _ = writer.send(MessageType::Drain, b"").await;
                    }
                    Some(Outbound::Shutdown) => {
                        let _ = writer.send(MessageType::Shutdown, b"").await;
                    }
                    Some(Outbound::Reload) => {
                        let _ = writer.send(MessageType::Reload, b"").await;
                    }
                    Some(Outbound::Broadcast(payload)) => {
                        let _ = writer.send_json(MessageType::WorkBroadcast, &payload).await;
                    }
                    None => break,
                },
                _ = self.inner.shutdown.cancelled() => break,
            }
        }

        let mut workers = self.inner.workers.lock();
        if let Some(record) = workers.get_mut(&worker_id) {
            record.link = None;
        }
    }

    fn handle_message(&self, worker_id: u32, message: crate::ipc::Message) {
        let mut workers = self.inner.workers.lock();
        let Some(record) = workers.get_mut(&worker_id) else {
            return;
        };
        match message.msg_type {
            MessageType::Ready => {
                record.state = WorkerState::Ready;
                record.last_heartbeat = Some(Instant::now());
                record.backoff.reset();
                drop(workers);
                self.emit(ClusterEvent::WorkerReady {
                    cluster_name: self.inner.config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    worker_id,
                });
            }
            MessageType::Heartbeat => {
                record.last_heartbeat = Some(Instant::now());
                if matches!(record.state, WorkerState::Ready | WorkerState::Busy) {
                    let busy = message
                        .json::<serde_json::Value>()
                        .ok()
                        .and_then(|v| v.get("busy").and_then(|b| b.as_bool()))
                        .unwrap_or(false);
                    record.state = if busy {
                        WorkerState::Busy
                    } else {
                        WorkerState::Ready
                    };
                }
            }
            MessageType::DrainAck => {
                record.drained = true;
                record.state = WorkerState::Draining;
            }
            MessageType::Stats => {
                // Stats payloads are observability-only; listeners can
                // subscribe to them via the worker agent side.
            }
            _ => {}
        }
    }

    fn reject(&self, worker_id: u32, err: &ClusterError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(worker = worker_id, "IPC frame rejected: {err}");
        let reason = match err {
            ClusterError::Replay(reason) => reason,
            ClusterError::AuthFailed => "auth failed",
            ClusterError::Codec(reason) => reason,
            _ => "transport",
        };
        self.emit(ClusterEvent::IpcRejected {
            cluster_name: self.inner.config.name.clone(),
            timestamp: std::time::Instant::now(),
            worker_id,
            reason,
        });
    }

    async fn monitor_loop(&self) {
        let interval = self.inner.config.heartbeat_interval;
        let budget = interval * self.inner.config.max_missed_heartbeats;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.inner.shutdown.cancelled() => return,
            }

            let stale: Vec<(u32, u32)> = {
                let workers = self.inner.workers.lock();
                workers
                    .values()
                    .filter(|w| matches!(w.state, WorkerState::Ready | WorkerState::Busy))
                    .filter_map(|w| {
                        let last = w.last_heartbeat?;
                        (last.elapsed() > budget).then_some((w.id, w.pid.unwrap_or(0)))
                    })
                    .collect()
            };

            for (worker_id, pid) in stale {
                #[cfg(feature = "tracing")]
                tracing::error!(worker = worker_id, "heartbeat budget exhausted, killing worker");
                self.emit(ClusterEvent::WorkerDied {
                    cluster_name: self.inner.config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    worker_id,
                    reason: "missed heartbeats".to_string(),
                });
                if pid != 0 {
                    force_kill(pid);
                    // The exit watcher observes the death and restarts.
                }
            }
        }
    }

    fn emit(&self, event: ClusterEvent) {
        self.inner.config.event_listeners.emit(&event);
    }
}

/// Forcefully terminates a worker's process group (Unix) or process.
fn force_kill(pid: u32) {
    #[cfg(unix)]
    {
        let target = nix::unistd::Pid::from_raw(pid as i32);
        let group = nix::unistd::getpgid(Some(target)).unwrap_or(target);
        let _ = nix::sys::signal::killpg(group, nix::sys::signal::Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output();
    }
}
