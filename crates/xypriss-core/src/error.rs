//! The XyPriss error taxonomy.
//!
//! Every fallible operation in the server resolves to one of the kinds in
//! [`ErrorKind`]. Components define their own richer error enums but expose a
//! `kind()` accessor, so the default error responder can map any failure to a
//! status code and a stable wire shape without downcasting through trait
//! objects.
//!
//! # Example
//!
//! ```rust
//! use xypriss_core::{ErrorKind, ServerError};
//!
//! let err = ServerError::new(ErrorKind::NotFound, "no route for GET /missing");
//! assert_eq!(err.kind(), ErrorKind::NotFound);
//! assert_eq!(err.kind().status(), 404);
//! ```

use std::fmt;

/// Classification of every error the server can surface.
///
/// The kind determines the HTTP status code emitted by the default error
/// responder and is the only part of an error that crosses the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Configuration rejected before start.
    InvalidConfig,
    /// The requested port is already bound.
    PortInUse,
    /// The operating system denied the operation.
    PermissionDenied,
    /// Auto-switch exhausted its candidate ports.
    NoCandidate,
    /// No route matches the request path.
    NotFound,
    /// A route matches the path but not the method.
    MethodNotAllowed,
    /// The request is malformed.
    BadRequest,
    /// The request body exceeds the configured limit.
    PayloadTooLarge,
    /// A handler or middleware failed.
    HandlerError,
    /// A deadline elapsed.
    Timeout,
    /// The operation was cancelled before its deadline.
    Cancelled,
    /// The worker pool queue is at its high-water mark.
    QueueSaturated,
    /// The worker pool no longer accepts submissions.
    PoolShuttingDown,
    /// A cache build closure failed.
    CacheBuildFailed,
    /// A collaborator backend is unreachable.
    UpstreamUnavailable,
    /// An IPC frame failed authentication.
    IpcAuthFailed,
    /// An IPC frame reused a nonce or regressed its sequence number.
    IpcReplay,
    /// A cluster worker exited abnormally.
    WorkerCrashed,
    /// A cluster worker exceeded its restart budget and was parked.
    WorkerParked,
    /// The server is draining and refuses new work.
    ShuttingDown,
}

impl ErrorKind {
    /// The HTTP status code the default error responder emits for this kind.
    ///
    /// Kinds that never travel on the request path (port arbitration, IPC,
    /// cluster supervision) map to 500 so a leak is visible rather than
    /// silent.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::BadRequest => 400,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::Timeout => 504,
            ErrorKind::QueueSaturated | ErrorKind::PoolShuttingDown | ErrorKind::ShuttingDown => {
                503
            }
            ErrorKind::UpstreamUnavailable => 502,
            _ => 500,
        }
    }

    /// Stable wire name for the error body's `error` field.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidConfig => "InvalidConfig",
            ErrorKind::PortInUse => "PortInUse",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::NoCandidate => "NoCandidate",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::MethodNotAllowed => "MethodNotAllowed",
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::HandlerError => "HandlerError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::QueueSaturated => "QueueSaturated",
            ErrorKind::PoolShuttingDown => "PoolShuttingDown",
            ErrorKind::CacheBuildFailed => "CacheBuildFailed",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::IpcAuthFailed => "IPCAuthFailed",
            ErrorKind::IpcReplay => "IPCReplay",
            ErrorKind::WorkerCrashed => "WorkerCrashed",
            ErrorKind::WorkerParked => "WorkerParked",
            ErrorKind::ShuttingDown => "ShuttingDown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error carrying a taxonomy kind, a human-readable message, and an
/// optional source.
///
/// Messages are written for operators: they never embed secrets, stack
/// traces, or raw collaborator output. Component error enums convert into
/// `ServerError` at the seam where they leave their crate.
#[derive(Debug)]
pub struct ServerError {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ServerError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches an underlying cause.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Wraps an arbitrary handler failure into [`ErrorKind::HandlerError`].
    pub fn handler(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorKind::HandlerError, "handler failed").with_source(source)
    }

    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The operator-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if this error signals a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// Returns true if this error signals cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Returns true if this error signals a refusal to accept new work.
    pub fn is_overloaded(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::QueueSaturated | ErrorKind::PoolShuttingDown | ErrorKind::ShuttingDown
        )
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}
