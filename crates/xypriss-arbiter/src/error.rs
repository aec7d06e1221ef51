//! Arbiter error types.

use xypriss_core::ErrorKind;

/// Failure to obtain or free a port.
#[derive(Debug, thiserror::Error)]
pub enum ArbiterError {
    /// The request itself was malformed (inverted range, zero attempts).
    #[error("invalid port request: {0}")]
    InvalidPort(String),

    /// The port is bound by another owner and auto-switch was off or
    /// exhausted without trying alternatives.
    #[error("port {port} is in use")]
    PortInUse { port: u16 },

    /// The operating system denied binding (privileged port, policy).
    #[error("binding port {port} was denied")]
    PermissionDenied { port: u16 },

    /// Auto-switch tried every candidate without success.
    #[error("no free candidate port after {attempts} attempts")]
    NoCandidate { attempts: usize },

    /// Port inspection or signalling infrastructure failed.
    #[error("port command failed: {0}")]
    Command(#[from] std::io::Error),
}

impl ArbiterError {
    /// The taxonomy kind for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArbiterError::InvalidPort(_) => ErrorKind::InvalidConfig,
            ArbiterError::PortInUse { .. } => ErrorKind::PortInUse,
            ArbiterError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            ArbiterError::NoCandidate { .. } => ErrorKind::NoCandidate,
            ArbiterError::Command(_) => ErrorKind::UpstreamUnavailable,
        }
    }
}

impl From<ArbiterError> for xypriss_core::ServerError {
    fn from(err: ArbiterError) -> Self {
        xypriss_core::ServerError::new(err.kind(), err.to_string())
    }
}
