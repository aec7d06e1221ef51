//! Router error types.

use http::Method;
use xypriss_core::ErrorKind;

/// A pattern rejected at registration time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid pattern `{pattern}`: {reason}")]
pub struct PatternError {
    /// The offending pattern as given.
    pub pattern: String,
    /// What was wrong with it.
    pub reason: &'static str,
}

/// A lookup that resolved to no handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    /// No pattern of any method matches the path.
    #[error("no route matches the path")]
    NotFound,

    /// Another method matches the path; carries the allowed methods for the
    /// `Allow` response header, sorted and deduplicated.
    #[error("method not allowed")]
    MethodNotAllowed { allow: Vec<Method> },
}

impl MatchError {
    /// The taxonomy kind for the default error responder.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MatchError::NotFound => ErrorKind::NotFound,
            MatchError::MethodNotAllowed { .. } => ErrorKind::MethodNotAllowed,
        }
    }
}
