//! Cache error types.

use std::sync::Arc;
use xypriss_core::{ErrorKind, ServerError};

/// Error returned by cache operations.
///
/// Build failures carry the original error behind an `Arc` so every
/// singleflight waiter observes the same failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The build closure failed; all waiters of that flight receive this.
    #[error("cache build failed: {0}")]
    BuildFailed(Arc<ServerError>),

    /// The build task was aborted because every waiter went away.
    #[error("cache build abandoned")]
    BuildAbandoned,

    /// A collaborator backend failed and the cache is configured strict.
    #[error("cache backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl CacheError {
    /// The taxonomy kind for the default error responder.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::BuildFailed(_) | CacheError::BuildAbandoned => ErrorKind::CacheBuildFailed,
            CacheError::BackendUnavailable(_) => ErrorKind::UpstreamUnavailable,
        }
    }
}

impl From<CacheError> for ServerError {
    fn from(err: CacheError) -> Self {
        ServerError::new(err.kind(), err.to_string())
    }
}
