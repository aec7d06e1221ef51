//! Port acquisition.

use crate::config::{AcquireOptions, SwitchStrategy};
use crate::error::ArbiterError;
use crate::force_close::{ForceCloseOutcome, ForceCloser};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;

const LISTEN_BACKLOG: i32 = 1024;

/// A bound listening socket and the address it ended up on (which differs
/// from the requested one after an auto-switch or an ephemeral bind).
#[derive(Debug)]
pub struct ListenSocket {
    listener: TcpListener,
    addr: SocketAddr,
}

impl ListenSocket {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn into_listener(self) -> TcpListener {
        self.listener
    }
}

/// Acquires listening sockets with auto-switch fallback and force-close.
pub struct PortArbiter {
    closer: ForceCloser,
}

impl PortArbiter {
    pub fn new() -> Self {
        Self {
            closer: ForceCloser::platform(),
        }
    }

    /// Uses custom inspection/signalling shims; test seams and exotic
    /// platforms.
    pub fn with_closer(closer: ForceCloser) -> Self {
        Self { closer }
    }

    /// Binds `(host, port)`. Port 0 requests an ephemeral port.
    ///
    /// With auto-switch enabled, an occupied requested port falls through
    /// to candidates enumerated by the strategy; the first successful bind
    /// wins and no partially bound socket survives an attempt.
    pub async fn acquire(
        &self,
        host: IpAddr,
        port: u16,
        opts: &AcquireOptions,
    ) -> Result<ListenSocket, ArbiterError> {
        match bind(SocketAddr::new(host, port), opts.reuse_port) {
            Ok(socket) => return Ok(socket),
            Err(err @ ArbiterError::PortInUse { .. }) => {
                let Some(auto) = opts.auto_switch else {
                    return Err(err);
                };
                self.acquire_fallback(host, port, auto, opts.reuse_port).await
            }
            Err(err) => Err(err),
        }
    }

    async fn acquire_fallback(
        &self,
        host: IpAddr,
        requested: u16,
        auto: crate::config::AutoSwitch,
        auto_reuse: bool,
    ) -> Result<ListenSocket, ArbiterError> {
        let (lo, hi) = auto.range;
        if lo > hi || lo == 0 {
            return Err(ArbiterError::InvalidPort(format!(
                "auto-switch range {lo}..={hi} is invalid"
            )));
        }
        if auto.max_attempts <= 1 {
            return Err(ArbiterError::NoCandidate { attempts: 1 });
        }

        // The requested port consumed the first attempt.
        let budget = auto.max_attempts - 1;
        let mut attempts = 1usize;

        match auto.strategy {
            SwitchStrategy::Increment => {
                for candidate in (lo..=hi).filter(|p| *p != requested).take(budget) {
                    attempts += 1;
                    match bind(SocketAddr::new(host, candidate), auto_reuse) {
                        Ok(socket) => {
                            #[cfg(feature = "tracing")]
                            tracing::info!(requested, switched_to = candidate, "auto-switched port");
                            return Ok(socket);
                        }
                        Err(ArbiterError::PortInUse { .. }) => continue,
                        Err(err) => return Err(err),
                    }
                }
            }
            SwitchStrategy::Random => {
                let mut tried: HashSet<u16> = HashSet::new();
                tried.insert(requested);
                let span = usize::from(hi - lo) + 1;
                while attempts - 1 < budget && tried.len() < span.saturating_add(1) {
                    let candidate = rand::random_range(lo..=hi);
                    if !tried.insert(candidate) {
                        continue;
                    }
                    attempts += 1;
                    match bind(SocketAddr::new(host, candidate), auto_reuse) {
                        Ok(socket) => {
                            #[cfg(feature = "tracing")]
                            tracing::info!(requested, switched_to = candidate, "auto-switched port");
                            return Ok(socket);
                        }
                        Err(ArbiterError::PortInUse { .. }) => continue,
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        Err(ArbiterError::NoCandidate { attempts })
    }

    /// Evicts whatever currently owns `port`. See [`ForceCloseOutcome`] for
    /// the distinct results; `Protected` owners are never retried.
    pub async fn force_close(&self, port: u16) -> Result<ForceCloseOutcome, ArbiterError> {
        self.closer.force_close(port).await
    }
}

impl Default for PortArbiter {
    fn default() -> Self {
        Self::new()
    }
}

/// One bind attempt. Failed attempts leave no socket behind: the `Socket`
/// drops (closing the fd) on any error path.
fn bind(addr: SocketAddr, reuse_port: bool) -> Result<ListenSocket, ArbiterError> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(map_io(addr))?;
    socket.set_reuse_address(true).map_err(map_io(addr))?;
    #[cfg(unix)]
    if reuse_port {
        socket.set_reuse_port(true).map_err(map_io(addr))?;
    }
    #[cfg(not(unix))]
    let _ = reuse_port;
    socket.set_nodelay(true).map_err(map_io(addr))?;
    socket.set_nonblocking(true).map_err(map_io(addr))?;
    socket.bind(&addr.into()).map_err(map_io(addr))?;
    socket.listen(LISTEN_BACKLOG).map_err(map_io(addr))?;

    let std_listener: std::net::TcpListener = socket.into();
    let local = std_listener.local_addr().map_err(map_io(addr))?;
    let listener = TcpListener::from_std(std_listener).map_err(map_io(addr))?;
    Ok(ListenSocket {
        listener,
        addr: local,
    })
}

fn map_io(addr: SocketAddr) -> impl Fn(std::io::Error) -> ArbiterError {
    move |err| match err.kind() {
        std::io::ErrorKind::AddrInUse => ArbiterError::PortInUse { port: addr.port() },
        std::io::ErrorKind::PermissionDenied => {
            ArbiterError::PermissionDenied { port: addr.port() }
        }
        _ => ArbiterError::Command(err),
    }
}

/// Probe used after a force-close to re-verify the port is free.
pub(crate) fn probe(addr: SocketAddr) -> bool {
    bind(addr, false).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoSwitch;

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn test_ephemeral_bind() {
        let arbiter = PortArbiter::new();
        let socket = arbiter
            .acquire(localhost(), 0, &AcquireOptions::new())
            .await
            .unwrap();
        assert_ne!(socket.addr().port(), 0);
    }

    #[tokio::test]
    async fn test_occupied_port_without_fallback() {
        let arbiter = PortArbiter::new();
        let held = arbiter
            .acquire(localhost(), 0, &AcquireOptions::new())
            .await
            .unwrap();
        let port = held.addr().port();

        let result = arbiter.acquire(localhost(), port, &AcquireOptions::new()).await;
        assert!(matches!(result, Err(ArbiterError::PortInUse { port: p }) if p == port));
    }

    #[tokio::test]
    async fn test_auto_switch_increment() {
        let arbiter = PortArbiter::new();
        let held = arbiter
            .acquire(localhost(), 0, &AcquireOptions::new())
            .await
            .unwrap();
        let port = held.addr().port();

        let opts = AcquireOptions::new().auto_switch(AutoSwitch {
            range: (port, port.saturating_add(20)),
            strategy: SwitchStrategy::Increment,
            max_attempts: 21,
        });
        let switched = arbiter.acquire(localhost(), port, &opts).await.unwrap();
        assert_ne!(switched.addr().port(), port);
        assert!(switched.addr().port() > port);
    }

    #[tokio::test]
    async fn test_auto_switch_random_stays_in_range() {
        let arbiter = PortArbiter::new();
        let held = arbiter
            .acquire(localhost(), 0, &AcquireOptions::new())
            .await
            .unwrap();
        let port = held.addr().port();
        let (lo, hi) = (port.saturating_add(1), port.saturating_add(50));

        let opts = AcquireOptions::new().auto_switch(AutoSwitch {
            range: (lo, hi),
            strategy: SwitchStrategy::Random,
            max_attempts: 30,
        });
        let switched = arbiter.acquire(localhost(), port, &opts).await.unwrap();
        let p = switched.addr().port();
        assert!(p >= lo && p <= hi);
    }

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let arbiter = PortArbiter::new();
        let held = arbiter
            .acquire(localhost(), 0, &AcquireOptions::new())
            .await
            .unwrap();
        let port = held.addr().port();

        let opts = AcquireOptions::new().auto_switch(AutoSwitch {
            range: (900, 80),
            strategy: SwitchStrategy::Increment,
            max_attempts: 5,
        });
        assert!(matches!(
            arbiter.acquire(localhost(), port, &opts).await,
            Err(ArbiterError::InvalidPort(_))
        ));
    }
}
