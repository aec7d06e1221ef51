//! The server configuration structure.
//!
//! One plain value assembled before start; the request path never reads
//! configuration from the environment. Deserializable from JSON so the CLI
//! can load a config file.

use serde::Deserialize;
use std::time::Duration;
use xypriss_core::{ErrorKind, ServerError};

/// Auto-switch settings for the listener port.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutoPortSwitchConfig {
    pub enabled: bool,
    /// Inclusive candidate range.
    pub port_range: (u16, u16),
    pub strategy: PortSwitchStrategy,
    pub max_attempts: usize,
}

impl Default for AutoPortSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port_range: (8080, 8180),
            strategy: PortSwitchStrategy::Increment,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSwitchStrategy {
    Increment,
    Random,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    pub auto_port_switch: AutoPortSwitchConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            auto_port_switch: AutoPortSwitchConfig::default(),
        }
    }
}

/// Worker count: a number or `"auto"` (one per CPU).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WorkersOption {
    Fixed(u32),
    Auto(AutoMarker),
}

/// The literal string `"auto"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoMarker {
    Auto,
}

impl Default for WorkersOption {
    fn default() -> Self {
        WorkersOption::Auto(AutoMarker::Auto)
    }
}

impl WorkersOption {
    pub fn resolve(self) -> u32 {
        match self {
            WorkersOption::Fixed(n) => n.max(1),
            WorkersOption::Auto(_) => num_cpus::get().max(1) as u32,
        }
    }
}

/// Worker isolation and IPC security settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterSecurityConfig {
    /// Workers get a restricted environment and no shared state.
    pub isolate_workers: bool,
    /// Per-worker file-descriptor cap.
    pub max_open_files: Option<u64>,
    /// Park workers that crash-loop instead of restarting forever.
    pub prevent_fork_bombs: bool,
    /// IPC encryption is always on; `false` is rejected at validation.
    #[serde(alias = "encryptIPC")]
    pub encrypt_ipc: bool,
    /// Spawn workers with an empty environment.
    pub sandbox_mode: bool,
}

impl Default for ClusterSecurityConfig {
    fn default() -> Self {
        Self {
            isolate_workers: true,
            max_open_files: None,
            prevent_fork_bombs: true,
            encrypt_ipc: true,
            sandbox_mode: false,
        }
    }
}

/// Cluster settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterSection {
    pub enabled: bool,
    pub workers: WorkersOption,
    pub security: ClusterSecurityConfig,
}

/// One worker-pool lane.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LaneSection {
    pub min: usize,
    pub max: usize,
}

impl Default for LaneSection {
    fn default() -> Self {
        Self { min: 1, max: 4 }
    }
}

/// Worker-pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerPoolSection {
    pub cpu: LaneSection,
    pub io: LaneSection,
    /// High-water mark on queued tasks per lane.
    pub max_concurrent_tasks: usize,
}

impl Default for WorkerPoolSection {
    fn default() -> Self {
        Self {
            cpu: LaneSection { min: 1, max: 4 },
            io: LaneSection { min: 2, max: 8 },
            max_concurrent_tasks: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategyOption {
    Memory,
    Redis,
    Hybrid,
}

/// Collaborator redis coordinates, passed through untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RedisSection {
    pub host: String,
    pub port: u16,
    pub cluster: bool,
}

/// Response-cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheSection {
    pub enabled: bool,
    pub strategy: CacheStrategyOption,
    /// Total byte budget.
    pub max_size: usize,
    /// Default TTL in seconds; 0 disables expiry.
    pub ttl: u64,
    pub redis: RedisSection,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: CacheStrategyOption::Memory,
            max_size: 64 * 1024 * 1024,
            ttl: 300,
            redis: RedisSection::default(),
        }
    }
}

/// Pre-compiler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreCompilerSection {
    pub enabled: bool,
    /// Seconds of observation before any optimization.
    pub learning_period: u64,
    /// Requests per minute for promotion.
    pub optimization_threshold: f64,
    pub max_compiled_routes: usize,
    pub aggressive_optimization: bool,
    pub predictive_preloading: bool,
}

impl Default for PreCompilerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            learning_period: 60,
            optimization_threshold: 100.0,
            max_compiled_routes: 50,
            aggressive_optimization: false,
            predictive_preloading: false,
        }
    }
}

/// Per-request limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestSection {
    /// Request deadline in milliseconds.
    pub timeout_ms: u64,
    pub max_body_bytes: usize,
    pub max_connections: usize,
}

impl Default for RequestSection {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_body_bytes: 8 * 1024 * 1024,
            max_connections: 10_000,
        }
    }
}

/// The whole server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub server: ListenerConfig,
    pub cluster: ClusterSection,
    pub worker_pool: WorkerPoolSection,
    pub cache: CacheSection,
    pub pre_compiler: PreCompilerSection,
    pub request: RequestSection,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request.timeout_ms.max(1))
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache.ttl > 0).then(|| Duration::from_secs(self.cache.ttl))
    }

    /// Rejects configurations the core cannot honor.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.server.host.parse::<std::net::IpAddr>().is_err() {
            return Err(ServerError::new(
                ErrorKind::InvalidConfig,
                format!("`{}` is not a bindable host address", self.server.host),
            ));
        }
        let auto = &self.server.auto_port_switch;
        if auto.enabled && (auto.port_range.0 > auto.port_range.1 || auto.port_range.0 == 0) {
            return Err(ServerError::new(
                ErrorKind::InvalidConfig,
                "autoPortSwitch.portRange is invalid",
            ));
        }
        if !self.cluster.security.encrypt_ipc {
            return Err(ServerError::new(
                ErrorKind::InvalidConfig,
                "cluster IPC encryption cannot be disabled",
            ));
        }
        if self.request.max_connections == 0 {
            return Err(ServerError::new(
                ErrorKind::InvalidConfig,
                "request.maxConnections must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let raw = serde_json::json!({
            "server": {
                "host": "0.0.0.0",
                "port": 9090,
                "autoPortSwitch": {
                    "enabled": true,
                    "portRange": [9090, 9190],
                    "strategy": "random",
                    "maxAttempts": 5
                }
            },
            "cluster": { "enabled": true, "workers": "auto" },
            "workerPool": { "cpu": { "min": 2, "max": 6 }, "maxConcurrentTasks": 64 },
            "cache": { "strategy": "memory", "ttl": 60 },
            "preCompiler": { "learningPeriod": 10, "aggressiveOptimization": true }
        });
        let config: ServerConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.server.port, 9090);
        assert!(config.server.auto_port_switch.enabled);
        assert_eq!(
            config.server.auto_port_switch.strategy,
            PortSwitchStrategy::Random
        );
        assert!(config.cluster.enabled);
        assert_eq!(config.worker_pool.cpu.max, 6);
        assert_eq!(config.worker_pool.max_concurrent_tasks, 64);
        assert_eq!(config.cache_ttl(), Some(Duration::from_secs(60)));
        assert!(config.pre_compiler.aggressive_optimization);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_workers_fixed_or_auto() {
        let fixed: WorkersOption = serde_json::from_value(serde_json::json!(4)).unwrap();
        assert_eq!(fixed.resolve(), 4);
        let auto: WorkersOption = serde_json::from_value(serde_json::json!("auto")).unwrap();
        assert!(auto.resolve() >= 1);
        assert!(serde_json::from_value::<WorkersOption>(serde_json::json!("sometimes")).is_err());
    }

    #[test]
    fn test_rejects_disabled_encryption() {
        let config: ServerConfig = serde_json::from_value(serde_json::json!({
            "cluster": { "security": { "encryptIpc": false } }
        }))
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_host() {
        let config: ServerConfig = serde_json::from_value(serde_json::json!({
            "server": { "host": "not a host" }
        }))
        .unwrap();
        assert!(config.validate().is_err());
    }
}
