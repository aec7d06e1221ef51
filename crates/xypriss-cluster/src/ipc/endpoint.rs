//! IPC endpoint addressing and transport setup.

use crate::error::ClusterError;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};

/// Where a cluster's control plane listens.
///
/// Unix domain socket where available, loopback TCP elsewhere. The string
/// form (`unix:<path>` / `tcp:<addr>`) is what child processes receive via
/// the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcEndpoint {
    #[cfg(unix)]
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl IpcEndpoint {
    /// A private endpoint for a new cluster: an abstract-ish temp-dir UDS
    /// path on Unix, an ephemeral loopback port elsewhere.
    pub fn private(cluster_name: &str) -> Self {
        #[cfg(unix)]
        {
            let mut path = std::env::temp_dir();
            let suffix: u64 = rand::random();
            path.push(format!("xypriss-{cluster_name}-{suffix:016x}.sock"));
            IpcEndpoint::Unix(path)
        }
        #[cfg(not(unix))]
        {
            let _ = cluster_name;
            IpcEndpoint::Tcp("127.0.0.1:0".parse().expect("static addr"))
        }
    }

    pub fn parse(value: &str) -> Result<Self, ClusterError> {
        if let Some(rest) = value.strip_prefix("tcp:") {
            return rest
                .parse()
                .map(IpcEndpoint::Tcp)
                .map_err(|_| ClusterError::Codec("bad tcp endpoint"));
        }
        #[cfg(unix)]
        if let Some(rest) = value.strip_prefix("unix:") {
            return Ok(IpcEndpoint::Unix(PathBuf::from(rest)));
        }
        Err(ClusterError::Codec("unknown endpoint scheme"))
    }
}

impl std::fmt::Display for IpcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(unix)]
            IpcEndpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            IpcEndpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// Object-safe byte stream the sessions run over.
pub trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<S: AsyncRead + AsyncWrite + Unpin + Send> IpcStream for S {}

/// A boxed stream, as produced by [`IpcListener::accept`] and
/// [`IpcEndpoint::connect`].
pub type BoxedStream = Box<dyn IpcStream>;

/// The parent-side listener.
pub enum IpcListener {
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, PathBuf),
    Tcp(tokio::net::TcpListener),
}

impl IpcListener {
    /// Binds the endpoint; for TCP the returned endpoint carries the real
    /// (possibly ephemeral) port.
    pub async fn bind(endpoint: &IpcEndpoint) -> Result<(Self, IpcEndpoint), ClusterError> {
        match endpoint {
            #[cfg(unix)]
            IpcEndpoint::Unix(path) => {
                // A stale socket file from a dead supervisor blocks bind.
                let _ = tokio::fs::remove_file(path).await;
                let listener = tokio::net::UnixListener::bind(path)?;
                Ok((
                    IpcListener::Unix(listener, path.clone()),
                    IpcEndpoint::Unix(path.clone()),
                ))
            }
            IpcEndpoint::Tcp(addr) => {
                let listener = tokio::net::TcpListener::bind(addr).await?;
                let local = listener.local_addr()?;
                Ok((IpcListener::Tcp(listener), IpcEndpoint::Tcp(local)))
            }
        }
    }

    pub async fn accept(&self) -> Result<BoxedStream, ClusterError> {
        match self {
            #[cfg(unix)]
            IpcListener::Unix(listener, _) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
            IpcListener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl Drop for IpcListener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let IpcListener::Unix(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl IpcEndpoint {
    /// Child-side dial.
    pub async fn connect(&self) -> Result<BoxedStream, ClusterError> {
        match self {
            #[cfg(unix)]
            IpcEndpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Box::new(stream))
            }
            IpcEndpoint::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse_round_trip() {
        let tcp = IpcEndpoint::Tcp("127.0.0.1:4500".parse().unwrap());
        assert_eq!(IpcEndpoint::parse(&tcp.to_string()).unwrap(), tcp);

        #[cfg(unix)]
        {
            let unix = IpcEndpoint::Unix(PathBuf::from("/tmp/x.sock"));
            assert_eq!(IpcEndpoint::parse(&unix.to_string()).unwrap(), unix);
        }

        assert!(IpcEndpoint::parse("ftp:nope").is_err());
    }

    #[tokio::test]
    async fn test_bind_connect_accept() {
        let endpoint = IpcEndpoint::private("test");
        let (listener, actual) = IpcListener::bind(&endpoint).await.unwrap();
        let client = actual.connect();
        let server = listener.accept();
        let (client, server) = tokio::join!(client, server);
        assert!(client.is_ok());
        assert!(server.is_ok());
    }
}
