//! HTTP primitives shared across the XyPriss components.
//!
//! These types carry a request from the listener through the middleware
//! chain, the router, and down to a handler:
//!
//! - [`HttpRequest`] / [`HttpResponse`] - owned request/response values built
//!   on the `http` crate's method, status, and header types with `Bytes`
//!   bodies.
//! - [`RequestContext`] - the per-request state handed to middleware and
//!   handlers: typed, pre-declared slots plus an extensions map keyed by
//!   opaque [`ExtensionKey`] tokens.
//! - [`RequestFingerprint`] - stable cache keys derived from the parts of a
//!   request that must be equal for a cached response to be valid.

mod context;
mod fingerprint;
mod request;
mod response;

pub use context::{ExtensionKey, Extensions, RequestContext};
pub use fingerprint::RequestFingerprint;
pub use request::{parse_query, HttpRequest};
pub use response::HttpResponse;

pub use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
