//! Owned response representation.

use bytes::Bytes;
use http::header::{HeaderName, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};

/// An owned HTTP response produced by handlers and middleware.
///
/// Header values set through this API are always strings; collaborators that
/// work with list-valued fields (CORS allow lists and the like) serialize
/// them to comma-separated strings before storing them here.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    /// An empty 200 response.
    pub fn ok() -> Self {
        Self::with_status(StatusCode::OK)
    }

    /// An empty response with the given status.
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// A `text/plain` response.
    pub fn text(body: impl Into<String>) -> Self {
        let mut response = Self::ok().body(Bytes::from(body.into()));
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response
    }

    /// An `application/json` response serialized from `value`.
    ///
    /// Serialization failure degrades to a 500 with a fixed body rather than
    /// panicking inside a handler.
    pub fn json<T: serde::Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                let mut response = Self::ok().body(Bytes::from(bytes));
                response
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(_) => Self::with_status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Bytes::from_static(b"serialization failed")),
        }
    }

    /// Replaces the body.
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Replaces the status code.
    pub fn status_code(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Sets a header to a string value, replacing any previous value.
    ///
    /// Invalid names or values are ignored; the header API never stores a
    /// non-string representation.
    pub fn with_header(mut self, name: &str, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Consumes the response into (status, headers, body).
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_response() {
        let response = HttpResponse::text("hello");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body_bytes().as_ref(), b"hello");
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_json_response() {
        let response = HttpResponse::json(&serde_json::json!({"ok": true}));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(response.body_bytes().as_ref(), br#"{"ok":true}"#);
    }

    #[test]
    fn test_with_header_replaces() {
        let response = HttpResponse::ok()
            .with_header("x-request-id", "a")
            .with_header("x-request-id", "b");
        assert_eq!(response.headers().get("x-request-id").unwrap(), "b");
    }

    #[test]
    fn test_invalid_header_ignored() {
        let response = HttpResponse::ok().with_header("bad name", "v");
        assert!(response.headers().is_empty());
    }
}
