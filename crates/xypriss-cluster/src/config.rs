//! Cluster configuration.

use crate::error::ClusterError;
use crate::events::ClusterEvent;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use xypriss_core::events::{EventListeners, FnListener};

/// How many workers to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCount {
    Fixed(u32),
    /// One worker per logical CPU.
    Auto,
}

impl WorkerCount {
    pub fn resolve(self) -> u32 {
        match self {
            WorkerCount::Fixed(n) => n.max(1),
            WorkerCount::Auto => num_cpus::get().max(1) as u32,
        }
    }
}

/// The command a worker process is spawned with.
///
/// The supervisor appends nothing; the embedding server decides how the
/// binary recognizes worker mode (typically an argument plus the
/// [`crate::env`] variables).
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra environment set on top of the restricted base.
    pub env: HashMap<String, String>,
}

impl WorkerCommand {
    /// The current executable with the given arguments.
    pub fn current_exe(args: Vec<String>) -> std::io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args,
            env: HashMap::new(),
        })
    }
}

/// Per-worker resource limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLimits {
    /// File-descriptor cap (`RLIMIT_NOFILE` on Unix).
    pub max_open_files: Option<u64>,
    /// Niceness added to the worker (positive lowers priority).
    pub nice: Option<i32>,
}

/// Configuration for a [`crate::Supervisor`].
pub struct ClusterConfig {
    pub(crate) name: String,
    pub(crate) workers: WorkerCount,
    pub(crate) command: WorkerCommand,
    /// Root secret the IPC handshake is sealed with.
    pub(crate) secret: Vec<u8>,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) max_missed_heartbeats: u32,
    pub(crate) restart_backoff_base: Duration,
    pub(crate) restart_backoff_cap: Duration,
    pub(crate) max_restarts: usize,
    pub(crate) restart_window: Duration,
    pub(crate) drain_timeout: Duration,
    pub(crate) shutdown_timeout: Duration,
    /// Environment variables the workers inherit from the parent.
    pub(crate) inherit_env: Vec<String>,
    /// Clears even the inherited allow-list (restricted capability set).
    pub(crate) sandbox_mode: bool,
    pub(crate) limits: ResourceLimits,
    pub(crate) event_listeners: EventListeners<ClusterEvent>,
}

impl ClusterConfig {
    pub fn builder(command: WorkerCommand) -> ClusterConfigBuilder {
        ClusterConfigBuilder::new(command)
    }

    pub(crate) fn validate(&self) -> Result<(), ClusterError> {
        if self.secret.is_empty() {
            return Err(ClusterError::InvalidConfig(
                "cluster secret must not be empty".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ClusterError::InvalidConfig(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if self.max_missed_heartbeats == 0 {
            return Err(ClusterError::InvalidConfig(
                "max missed heartbeats must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ClusterConfig`].
pub struct ClusterConfigBuilder {
    name: String,
    workers: WorkerCount,
    command: WorkerCommand,
    secret: Vec<u8>,
    heartbeat_interval: Duration,
    max_missed_heartbeats: u32,
    restart_backoff_base: Duration,
    restart_backoff_cap: Duration,
    max_restarts: usize,
    restart_window: Duration,
    drain_timeout: Duration,
    shutdown_timeout: Duration,
    inherit_env: Vec<String>,
    sandbox_mode: bool,
    limits: ResourceLimits,
    event_listeners: EventListeners<ClusterEvent>,
}

impl ClusterConfigBuilder {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            name: String::from("<unnamed>"),
            workers: WorkerCount::Auto,
            command,
            secret: Vec::new(),
            heartbeat_interval: Duration::from_secs(5),
            max_missed_heartbeats: 3,
            restart_backoff_base: Duration::from_millis(100),
            restart_backoff_cap: Duration::from_secs(30),
            max_restarts: 5,
            restart_window: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            inherit_env: vec!["PATH".to_string(), "HOME".to_string()],
            sandbox_mode: false,
            limits: ResourceLimits::default(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the cluster name for observability.
    ///
    /// Default: `"<unnamed>"`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of workers, fixed or one per CPU.
    ///
    /// Default: [`WorkerCount::Auto`]
    pub fn workers(mut self, workers: WorkerCount) -> Self {
        self.workers = workers;
        self
    }

    /// Pre-shared root secret sealing the IPC handshake. Generated
    /// randomly when not set.
    pub fn secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Heartbeat cadence for every worker link.
    ///
    /// Default: 5 s
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Consecutive missed heartbeats before a worker is declared dead.
    ///
    /// Default: 3
    pub fn max_missed_heartbeats(mut self, missed: u32) -> Self {
        self.max_missed_heartbeats = missed;
        self
    }

    /// Crash-restart backoff, exponential from `base` capped at `cap`.
    ///
    /// Default: 100 ms base, 30 s cap
    pub fn restart_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.restart_backoff_base = base;
        self.restart_backoff_cap = cap;
        self
    }

    /// Parking policy: more than `max_restarts` crashes within `window`
    /// parks the worker until operator intervention.
    ///
    /// Default: 5 crashes per 60 s
    pub fn parking_policy(mut self, max_restarts: usize, window: Duration) -> Self {
        self.max_restarts = max_restarts;
        self.restart_window = window;
        self
    }

    /// Graceful-shutdown phase timeouts.
    ///
    /// Default: 30 s drain, 10 s shutdown
    pub fn shutdown_timeouts(mut self, drain: Duration, shutdown: Duration) -> Self {
        self.drain_timeout = drain;
        self.shutdown_timeout = shutdown;
        self
    }

    /// Environment variables workers inherit; everything else is dropped.
    ///
    /// Default: `PATH`, `HOME`
    pub fn inherit_env<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inherit_env = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sandbox mode: workers start with an empty environment (beyond the
    /// link variables) where the platform supports nothing stronger.
    ///
    /// Default: false
    pub fn sandbox_mode(mut self, sandbox: bool) -> Self {
        self.sandbox_mode = sandbox;
        self
    }

    /// Per-worker resource limits.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Registers a callback for parked workers.
    pub fn on_parked<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ClusterEvent::WorkerParked { worker_id, .. } = event {
                f(*worker_id);
            }
        }));
        self
    }

    /// Registers a raw event listener.
    pub fn event_listener<L>(mut self, listener: L) -> Self
    where
        L: xypriss_core::events::EventListener<ClusterEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    pub fn build(mut self) -> ClusterConfig {
        if self.secret.is_empty() {
            self.secret = rand::random::<[u8; 32]>().to_vec();
        }
        ClusterConfig {
            name: self.name,
            workers: self.workers,
            command: self.command,
            secret: self.secret,
            heartbeat_interval: self.heartbeat_interval,
            max_missed_heartbeats: self.max_missed_heartbeats,
            restart_backoff_base: self.restart_backoff_base,
            restart_backoff_cap: self.restart_backoff_cap,
            max_restarts: self.max_restarts,
            restart_window: self.restart_window,
            drain_timeout: self.drain_timeout,
            shutdown_timeout: self.shutdown_timeout,
            inherit_env: self.inherit_env,
            sandbox_mode: self.sandbox_mode,
            limits: self.limits,
            event_listeners: self.event_listeners,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> WorkerCommand {
        WorkerCommand {
            program: PathBuf::from("/bin/true"),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::builder(command()).build();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.max_missed_heartbeats, 3);
        assert_eq!(config.max_restarts, 5);
        assert_eq!(config.secret.len(), 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_count_resolution() {
        assert_eq!(WorkerCount::Fixed(4).resolve(), 4);
        assert_eq!(WorkerCount::Fixed(0).resolve(), 1);
        assert!(WorkerCount::Auto.resolve() >= 1);
    }

    #[test]
    fn test_validation() {
        let config = ClusterConfig::builder(command())
            .heartbeat_interval(Duration::ZERO)
            .build();
        assert!(config.validate().is_err());

        let config = ClusterConfig::builder(command())
            .max_missed_heartbeats(0)
            .build();
        assert!(config.validate().is_err());
    }
}
