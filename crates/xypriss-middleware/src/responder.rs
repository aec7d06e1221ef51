//! The default error responder.

use http::StatusCode;
use xypriss_core::{ErrorKind, ServerError};
use xypriss_http::HttpResponse;

/// The single sink for errors no middleware caught.
///
/// Maps the error taxonomy to HTTP statuses and emits a small, stable body:
/// `{"error": kind, "message": ..., "correlationId": ...}` when the client
/// accepts JSON, plain text otherwise. Messages come from [`ServerError`]
/// and therefore never contain stack traces or collaborator internals.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorResponder;

impl ErrorResponder {
    pub fn new() -> Self {
        Self
    }

    /// Builds the response for an uncaught error.
    pub fn response(
        &self,
        error: &ServerError,
        correlation_id: &str,
        accepts_json: bool,
    ) -> HttpResponse {
        let status = StatusCode::from_u16(error.kind().status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        #[cfg(feature = "tracing")]
        if status.is_server_error() {
            tracing::warn!(
                kind = error.kind().as_str(),
                correlation_id,
                "request failed: {}",
                error.message()
            );
        }

        if accepts_json {
            let body = serde_json::json!({
                "error": error.kind().as_str(),
                "message": error.message(),
                "correlationId": correlation_id,
            });
            HttpResponse::json(&body).status_code(status)
        } else {
            HttpResponse::text(format!(
                "{}: {} (correlation id {})",
                error.kind().as_str(),
                error.message(),
                correlation_id
            ))
            .status_code(status)
        }
    }

    /// Builds the 405 response, including the `Allow` header.
    pub fn method_not_allowed(
        &self,
        allow: &[http::Method],
        correlation_id: &str,
        accepts_json: bool,
    ) -> HttpResponse {
        let error = ServerError::new(ErrorKind::MethodNotAllowed, "method not allowed");
        let allow_value = allow
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        self.response(&error, correlation_id, accepts_json)
            .with_header("allow", allow_value)
    }
}
