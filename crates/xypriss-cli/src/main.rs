//! The `xypriss` binary.
//!
//! Exit codes: `server start` exits 0 on clean shutdown and 1 on fatal
//! error; `server stop` 0/1; `port force-close` 0 when the port was freed,
//! 2 when the owner is protected, 1 on error.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use xypriss_http::{HttpResponse, RequestContext};
use xypriss_server::{cluster, ServerBuilder, ServerConfig, WorkersOption};

#[derive(Parser)]
#[command(name = "xypriss", version, about = "XyPriss application server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Server lifecycle.
    #[command(subcommand)]
    Server(ServerCommand),
    /// Port utilities.
    #[command(subcommand)]
    Port(PortCommand),
}

#[derive(Subcommand)]
enum ServerCommand {
    /// Start the server (foreground).
    Start {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
        /// Cluster worker count; implies cluster mode when > 1.
        #[arg(long)]
        workers: Option<u32>,
        /// JSON configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// File the supervisor pid is recorded in.
        #[arg(long, default_value = "/tmp/xypriss.pid")]
        pid_file: PathBuf,
        /// Internal: run as a cluster worker process.
        #[arg(long, hide = true)]
        worker: bool,
    },
    /// Signal a running server to stop.
    Stop {
        /// Milliseconds to wait for the process to exit.
        #[arg(long, default_value_t = 10_000)]
        timeout: u64,
        #[arg(long, default_value = "/tmp/xypriss.pid")]
        pid_file: PathBuf,
    },
}

#[derive(Subcommand)]
enum PortCommand {
    /// Evict whatever currently owns a port.
    ForceClose {
        #[arg(long)]
        port: u16,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("XY_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Server(ServerCommand::Start {
            port,
            host,
            workers,
            config,
            pid_file,
            worker,
        }) => server_start(port, host, workers, config, pid_file, worker).await,
        Command::Server(ServerCommand::Stop { timeout, pid_file }) => {
            server_stop(timeout, pid_file).await
        }
        Command::Port(PortCommand::ForceClose { port }) => port_force_close(port).await,
    }
}

async fn load_config(path: Option<PathBuf>) -> Result<ServerConfig, String> {
    match path {
        None => Ok(ServerConfig::default()),
        Some(path) => {
            let raw = tokio::fs::read(&path)
                .await
                .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
            serde_json::from_slice(&raw)
                .map_err(|err| format!("cannot parse {}: {err}", path.display()))
        }
    }
}

async fn server_start(
    port: Option<u16>,
    host: Option<String>,
    workers: Option<u32>,
    config_path: Option<PathBuf>,
    pid_file: PathBuf,
    worker: bool,
) -> ExitCode {
    let mut config = match load_config(config_path.clone()).await {
        Ok(config) => config,
        Err(message) => {
            tracing::error!("{message}");
            return ExitCode::from(1);
        }
    };
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(workers) = workers {
        config.cluster.enabled = workers > 1;
        config.cluster.workers = WorkersOption::Fixed(workers);
    }

    if config.cluster.enabled && !worker {
        return supervise(config, config_path, pid_file).await;
    }
    serve(config, worker, pid_file).await
}

/// Parent role: run the supervisor until interrupted.
async fn supervise(
    config: ServerConfig,
    config_path: Option<PathBuf>,
    pid_file: PathBuf,
) -> ExitCode {
    let mut args = vec!["server".to_string(), "start".to_string(), "--worker".to_string()];
    if let Some(path) = config_path {
        args.push("--config".to_string());
        args.push(path.display().to_string());
    }
    let command = match xypriss_cluster::WorkerCommand::current_exe(args) {
        Ok(command) => command,
        Err(err) => {
            tracing::error!("cannot locate own executable: {err}");
            return ExitCode::from(1);
        }
    };

    let supervisor = match cluster::run_supervisor(&config, command).await {
        Ok(supervisor) => supervisor,
        Err(err) => {
            tracing::error!("supervisor failed to start: {err}");
            return ExitCode::from(1);
        }
    };
    write_pid_file(&pid_file).await;
    tracing::info!("cluster supervisor running; ctrl-c to stop");

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("stopping cluster");
    supervisor.stop().await;
    let _ = tokio::fs::remove_file(&pid_file).await;
    ExitCode::SUCCESS
}

/// Serving role: single process, or one cluster worker.
async fn serve(config: ServerConfig, worker: bool, pid_file: PathBuf) -> ExitCode {
    let builder = ServerBuilder::new(config)
        .reuse_port(worker)
        .route(xypriss_http::Method::GET, "/health", |_ctx: RequestContext| async {
            Ok(HttpResponse::json(&serde_json::json!({ "status": "ok" })))
        });
    let builder = match builder {
        Ok(builder) => builder,
        Err(err) => {
            tracing::error!("invalid route table: {err}");
            return ExitCode::from(1);
        }
    };
    let server = match builder.build() {
        Ok(server) => std::sync::Arc::new(server),
        Err(err) => {
            tracing::error!("invalid configuration: {err}");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = server.start(None).await {
        tracing::error!("cannot start server: {err}");
        return ExitCode::from(1);
    }

    if worker {
        if let Err(err) =
            cluster::attach_worker_agent(std::sync::Arc::clone(&server), Duration::from_secs(5))
                .await
        {
            tracing::error!("cannot reach supervisor: {err}");
            return ExitCode::from(1);
        }
    } else {
        write_pid_file(&pid_file).await;
    }

    let _ = tokio::signal::ctrl_c().await;
    let result = server.stop(Duration::from_secs(10)).await;
    if !worker {
        let _ = tokio::fs::remove_file(&pid_file).await;
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::from(1),
    }
}

async fn server_stop(timeout_ms: u64, pid_file: PathBuf) -> ExitCode {
    let raw = match tokio::fs::read_to_string(&pid_file).await {
        Ok(raw) => raw,
        Err(err) => {
            tracing::error!("cannot read pid file {}: {err}", pid_file.display());
            return ExitCode::from(1);
        }
    };
    let pid: u32 = match raw.trim().parse() {
        Ok(pid) => pid,
        Err(_) => {
            tracing::error!("pid file {} is malformed", pid_file.display());
            return ExitCode::from(1);
        }
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let target = Pid::from_raw(pid as i32);
        if kill(target, Signal::SIGTERM).is_err() {
            tracing::error!("cannot signal pid {pid}");
            return ExitCode::from(1);
        }
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        while tokio::time::Instant::now() < deadline {
            // Signal 0 probes liveness.
            if kill(target, None).is_err() {
                return ExitCode::SUCCESS;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let _ = kill(target, Signal::SIGKILL);
        ExitCode::SUCCESS
    }
    #[cfg(not(unix))]
    {
        let _ = timeout_ms;
        tracing::error!("server stop is unix-only in this build");
        ExitCode::from(1)
    }
}

async fn port_force_close(port: u16) -> ExitCode {
    use xypriss_arbiter::{ForceCloseOutcome, PortArbiter};
    let arbiter = PortArbiter::new();
    match arbiter.force_close(port).await {
        Ok(ForceCloseOutcome::Freed) | Ok(ForceCloseOutcome::AlreadyFree) => {
            println!("port {port} is free");
            ExitCode::SUCCESS
        }
        Ok(ForceCloseOutcome::Protected) => {
            eprintln!("port {port} is held by a protected process");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("force-close failed: {err}");
            ExitCode::from(1)
        }
    }
}

async fn write_pid_file(path: &PathBuf) {
    let _ = tokio::fs::write(path, std::process::id().to_string()).await;
}
